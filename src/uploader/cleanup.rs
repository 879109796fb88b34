//! Delayed, guaranteed removal of delivered downloads.
//!
//! Removals run on one process-scoped worker task, never on the request that
//! scheduled them, so an abandoned or panicking session still gets its files
//! reclaimed. Anything that slips through is picked up by the periodic sweep.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use sysinfo::Disks;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};

use crate::security::FileSystemGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSettings {
    pub downloads_root: PathBuf,
    /// Wait before removal so in-flight upload streams can finish reading.
    pub delay: Duration,
    pub permission_retry_delay: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from("downloads"),
            delay: Duration::from_secs(5),
            permission_retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub max_age: Duration,
    pub min_free_bytes: u64,
}

enum CleanupCommand {
    Remove { path: PathBuf, delay: Duration },
    Shutdown,
}

/// Handle to the background removal worker. Cheap to clone.
#[derive(Clone)]
pub struct CleanupManager {
    sender: mpsc::UnboundedSender<CleanupCommand>,
    settings: Arc<CleanupSettings>,
    worker: Arc<Mutex<Option<JoinHandle<usize>>>>,
}

impl CleanupManager {
    /// Spawns the worker on the current runtime.
    pub fn start(settings: CleanupSettings) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let retry_delay = settings.permission_retry_delay;
        let handle = tokio::spawn(run_worker(receiver, retry_delay));

        log::debug!(
            "🧹 Cleanup worker started (delay {:?}, root {})",
            settings.delay,
            settings.downloads_root.display()
        );

        Self {
            sender,
            settings: Arc::new(settings),
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn settings(&self) -> &CleanupSettings {
        &self.settings
    }

    /// Schedules removal after the configured delay. Returns false if the
    /// path is outside the downloads root or the worker has stopped.
    pub fn schedule(&self, path: PathBuf) -> bool {
        self.schedule_after(path, self.settings.delay)
    }

    pub fn schedule_after(&self, path: PathBuf, delay: Duration) -> bool {
        if !FileSystemGuard::is_within_root(&path, &self.settings.downloads_root) {
            log::warn!(
                "🧹 Refusing to clean {}: not inside {}",
                path.display(),
                self.settings.downloads_root.display()
            );
            return false;
        }

        let display = path.display().to_string();
        match self.sender.send(CleanupCommand::Remove { path, delay }) {
            Ok(()) => {
                log::debug!("🧹 Scheduled cleanup of {} in {:?}", display, delay);
                true
            }
            Err(_) => {
                log::error!("🧹 Cleanup worker is gone, {} will be left for the sweep", display);
                false
            }
        }
    }

    /// A guard that schedules `target` when dropped, whatever the exit path.
    pub fn guard(&self) -> CleanupGuard {
        CleanupGuard {
            manager: self.clone(),
            target: None,
        }
    }

    /// Stops accepting work and waits for every pending removal to finish.
    /// Returns how many paths the worker removed over its lifetime.
    pub async fn shutdown(&self) -> usize {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return 0;
        };

        let _ = self.sender.send(CleanupCommand::Shutdown);
        match handle.await {
            Ok(removed) => {
                log::info!("🧹 Cleanup worker drained ({} path(s) removed)", removed);
                removed
            }
            Err(e) => {
                log::error!("🧹 Cleanup worker failed: {}", e);
                0
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<CleanupCommand>,
    retry_delay: Duration,
) -> usize {
    let mut pending: JoinSet<bool> = JoinSet::new();
    let mut removed = 0;

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(CleanupCommand::Remove { path, delay }) => {
                    pending.spawn(async move {
                        if !delay.is_zero() {
                            sleep(delay).await;
                        }
                        remove_path_with_retry(&path, retry_delay).await
                    });
                }
                Some(CleanupCommand::Shutdown) | None => break,
            },
            Some(done) = pending.join_next(), if !pending.is_empty() => {
                removed += count_removal(done);
            }
        }
    }

    while let Some(done) = pending.join_next().await {
        removed += count_removal(done);
    }
    removed
}

fn count_removal(done: Result<bool, tokio::task::JoinError>) -> usize {
    match done {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            log::error!("🧹 Cleanup task panicked: {}", e);
            0
        }
    }
}

/// Schedules its target exactly once: on [`CleanupGuard::finish`] or on drop.
pub struct CleanupGuard {
    manager: CleanupManager,
    target: Option<PathBuf>,
}

impl CleanupGuard {
    pub fn set_target(&mut self, target: Option<PathBuf>) {
        self.target = target;
    }

    /// Schedules the target now and returns what was scheduled.
    pub fn finish(mut self) -> Option<PathBuf> {
        let target = self.target.take()?;
        self.manager.schedule(target.clone());
        Some(target)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            log::warn!(
                "🧹 Session ended abnormally, scheduling cleanup of {}",
                target.display()
            );
            self.manager.schedule(target);
        }
    }
}

/// Removes a file or directory tree if it still exists.
///
/// Permission errors get one more attempt after `retry_delay`. Errors are
/// logged and never returned. Returns whether something was removed.
pub async fn remove_path_with_retry(path: &Path, retry_delay: Duration) -> bool {
    match remove_path(path).await {
        Ok(removed) => {
            if removed {
                log::info!("🧹 Removed {}", path.display());
            }
            removed
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            log::warn!(
                "🧹 Permission denied removing {}, retrying in {:?}",
                path.display(),
                retry_delay
            );
            sleep(retry_delay).await;
            match remove_path(path).await {
                Ok(removed) => removed,
                Err(e) => {
                    log::error!("🧹 Giving up on {}: {}", path.display(), e);
                    false
                }
            }
        }
        Err(e) => {
            log::error!("🧹 Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

async fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}

/// What a session should remove once it is done with `source`.
///
/// Directories are removed whole. A file inside a per-request directory takes
/// that directory with it; a file sitting directly in the root goes alone.
/// Anything outside `downloads_root` is never a target.
pub fn cleanup_target(source: &Path, downloads_root: &Path) -> Option<PathBuf> {
    if !FileSystemGuard::is_within_root(source, downloads_root) {
        log::warn!(
            "🧹 {} is outside {}, leaving it in place",
            source.display(),
            downloads_root.display()
        );
        return None;
    }

    if source.is_dir() {
        return Some(source.to_path_buf());
    }

    match source.parent() {
        Some(parent) if FileSystemGuard::is_within_root(parent, downloads_root) => {
            Some(parent.to_path_buf())
        }
        _ => Some(source.to_path_buf()),
    }
}

/// Removes top-level entries of `root` last modified more than `max_age` ago.
pub async fn sweep_old_downloads(root: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            log::error!("🧹 Cannot read {}: {}", root.display(), e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                log::warn!("🧹 Sweep stopped early in {}: {}", root.display(), e);
                break;
            }
        };

        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                log::debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age && remove_path_with_retry(&entry.path(), Duration::ZERO).await {
            removed += 1;
        }
    }

    if removed > 0 {
        log::info!("🧹 Sweep removed {} stale download(s) from {}", removed, root.display());
    }
    removed
}

/// Sweeps `root` every `settings.interval` and warns when disk space runs low.
/// Runs until the surrounding task is dropped.
pub async fn periodic_sweep(root: PathBuf, settings: SweepSettings) {
    let mut ticker = tokio::time::interval(settings.interval.max(Duration::from_secs(1)));

    loop {
        ticker.tick().await;
        sweep_old_downloads(&root, settings.max_age).await;

        let probe = root.clone();
        let (available, used) =
            match tokio::task::spawn_blocking(move || (check_disk_space(&probe), directory_size(&probe)))
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Disk check failed: {}", e);
                    continue;
                }
            };

        log::debug!("Downloads root holds {:.2} MB", used as f64 / 1024.0 / 1024.0);

        match available {
            Some(bytes) if bytes < settings.min_free_bytes => log::warn!(
                "⚠️ Low disk space: {:.2} GB free (minimum {:.2} GB)",
                bytes as f64 / GIB,
                settings.min_free_bytes as f64 / GIB
            ),
            Some(_) => {}
            None => log::debug!("No disk found for {}", root.display()),
        }
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Free bytes on the disk holding `path` (longest matching mount point).
pub fn check_disk_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| disk.available_space())
}

/// Total size of the files under `path`. Unreadable entries count as zero.
pub fn directory_size(path: &Path) -> u64 {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return 0,
    };
    if !metadata.is_dir() {
        return metadata.len();
    }

    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| directory_size(&entry.path()))
                .sum()
        })
        .unwrap_or(0)
}
