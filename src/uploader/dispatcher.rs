use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::downloads::DownloadOutcome;
use crate::errors::{truncate_error_text, AppError, AppResult};
use crate::localization::{fill, keys, Localizer, DEFAULT_LANGUAGE};
use crate::media::{self, MediaItem, MediaKind};
use crate::security::InputValidator;

use super::batcher::{make_batches, DeliveryLimits};
use super::cleanup::{cleanup_target, CleanupGuard, CleanupManager};
use super::session_table::{SessionTable, SessionToken};
use super::transport::{AudioMetadata, DeliveryResult, MediaTransport, Transport};

/// Pauses that keep a session under the transport's flood limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// After every attempted send, when another send follows.
    pub between_sends: Duration,
    /// Between items while a failed group is re-sent one by one.
    pub between_fallback_items: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_sends: Duration::from_secs(2),
            between_fallback_items: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub limits: DeliveryLimits,
    pub pacing: Pacing,
    pub error_text_limit: usize,
    pub notify_skipped: bool,
    pub session_ttl: Duration,
    pub session_capacity: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            limits: DeliveryLimits::default(),
            pacing: Pacing::default(),
            error_text_limit: 200,
            notify_skipped: true,
            session_ttl: Duration::from_secs(600),
            session_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Created,
    Classifying,
    Batching,
    Sending(usize),
    CleaningUp,
    Done,
}

/// Everything the pipeline needs to deliver one downloaded path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub chat_id: i64,
    pub source_path: PathBuf,
    pub language: String,
    pub kind_hint: Option<MediaKind>,
    pub caption: Option<String>,
    pub title: Option<String>,
    pub performer: Option<String>,
}

impl DeliveryRequest {
    pub fn new(chat_id: i64, source_path: impl Into<PathBuf>) -> Self {
        Self {
            chat_id,
            source_path: source_path.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            kind_hint: None,
            caption: None,
            title: None,
            performer: None,
        }
    }

    /// Builds a request from a downloader result, or returns the failure reason.
    pub fn from_outcome(
        chat_id: i64,
        language: &str,
        outcome: DownloadOutcome,
    ) -> Result<Self, String> {
        let (source_path, metadata) = match outcome {
            DownloadOutcome::SingleFile { path, metadata } => (path, metadata),
            DownloadOutcome::Carousel {
                directory,
                metadata,
            } => (directory, metadata),
            DownloadOutcome::FailedDownload { reason } => return Err(reason),
        };

        Ok(Self {
            chat_id,
            source_path,
            language: language.to_string(),
            kind_hint: metadata.kind_hint,
            caption: metadata.caption,
            title: metadata.title,
            performer: metadata.performer,
        })
    }
}

/// What happened during one session, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub states: Vec<SessionState>,
    pub results: Vec<DeliveryResult>,
    /// Items never attempted because they exceed the hard size ceiling.
    pub skipped: usize,
    /// Localization keys of the notices sent to the user.
    pub notices: Vec<&'static str>,
    pub cleanup_target: Option<PathBuf>,
}

impl DeliveryReport {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            states: vec![SessionState::Created],
            results: Vec::new(),
            skipped: 0,
            notices: Vec::new(),
            cleanup_target: None,
        }
    }

    fn enter(&mut self, state: SessionState) {
        log::debug!("[{}] {:?}", short_id(&self.session_id), state);
        self.states.push(state);
    }

    pub fn final_state(&self) -> Option<SessionState> {
        self.states.last().copied()
    }

    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, DeliveryResult::Failed { .. }))
            .count()
    }
}

/// Runs delivery sessions. Cheap to clone; clones share the same worker and
/// pending-session table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    transport: Transport,
    localizer: Arc<dyn Localizer>,
    cleanup: CleanupManager,
    settings: DispatcherSettings,
    pending: Mutex<SessionTable<DeliveryRequest>>,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn MediaTransport>,
        localizer: Arc<dyn Localizer>,
        cleanup: CleanupManager,
        settings: DispatcherSettings,
    ) -> Self {
        let transport = Transport::new(
            channel,
            settings.limits.max_single_file_bytes,
            settings.pacing.between_fallback_items,
        );
        let pending = Mutex::new(SessionTable::new(settings.session_capacity));

        Self {
            inner: Arc::new(DispatcherInner {
                transport,
                localizer,
                cleanup,
                settings,
                pending,
            }),
        }
    }

    /// Delivers `request` and waits for the report.
    ///
    /// The session runs on its own task: dropping this future does not stop
    /// it, and a panic inside it still schedules cleanup.
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryReport {
        let session_id = uuid::Uuid::new_v4().to_string();
        let handle = self.spawn_session(session_id.clone(), request);

        match handle.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("[{}] Delivery session aborted: {}", short_id(&session_id), e);
                let mut report = DeliveryReport::new(session_id);
                report.enter(SessionState::CleaningUp);
                report.enter(SessionState::Done);
                report
            }
        }
    }

    /// Fire-and-forget variant of [`Dispatcher::deliver`].
    pub fn spawn_delivery(&self, request: DeliveryRequest) -> JoinHandle<DeliveryReport> {
        self.spawn_session(uuid::Uuid::new_v4().to_string(), request)
    }

    /// Delivers a downloader result. A failed download only gets a notice.
    pub async fn deliver_outcome(
        &self,
        chat_id: i64,
        language: &str,
        outcome: DownloadOutcome,
    ) -> DeliveryReport {
        match DeliveryRequest::from_outcome(chat_id, language, outcome) {
            Ok(request) => self.deliver(request).await,
            Err(reason) => {
                let mut report = DeliveryReport::new(uuid::Uuid::new_v4().to_string());
                log::warn!("[{}] Download failed: {}", short_id(&report.session_id), reason);
                self.notify(chat_id, language, keys::NO_MEDIA, &[], &mut report)
                    .await;
                report.enter(SessionState::Done);
                report
            }
        }
    }

    /// Parks a request until the user confirms it (e.g. picks a format).
    pub fn hold(&self, request: DeliveryRequest) -> AppResult<SessionToken> {
        let mut pending = self
            .inner
            .pending
            .lock()
            .map_err(|_| AppError::Internal("Pending session table poisoned".to_string()))?;
        pending.insert(request, Instant::now(), self.inner.settings.session_ttl)
    }

    /// Delivers a request parked with [`Dispatcher::hold`]. `None` when the
    /// token is unknown or has expired.
    pub async fn deliver_held(&self, token: SessionToken) -> Option<DeliveryReport> {
        let request = {
            let mut pending = self.inner.pending.lock().ok()?;
            pending.take(token, Instant::now())
        };

        match request {
            Some(request) => Some(self.deliver(request).await),
            None => {
                log::info!("Session {} is unknown or expired", token);
                None
            }
        }
    }

    /// Drops parked requests whose time ran out.
    pub fn evict_expired(&self) -> usize {
        match self.inner.pending.lock() {
            Ok(mut pending) => pending.evict_expired(Instant::now()),
            Err(_) => 0,
        }
    }

    fn spawn_session(&self, session_id: String, request: DeliveryRequest) -> JoinHandle<DeliveryReport> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run_session(session_id, request).await })
    }

    async fn run_session(&self, session_id: String, request: DeliveryRequest) -> DeliveryReport {
        let mut report = DeliveryReport::new(session_id);
        let mut guard = self.inner.cleanup.guard();

        log::info!(
            "📤 [{}] Delivering {} to chat {}",
            short_id(&report.session_id),
            request.source_path.display(),
            request.chat_id
        );

        report.enter(SessionState::Classifying);
        let items = match self.classify(&request).await {
            Ok(items) => items,
            Err(AppError::NotFound { path }) => {
                log::warn!("[{}] Source not found: {}", short_id(&report.session_id), path);
                self.notify_request(&request, keys::FILE_NOT_FOUND, &[], &mut report)
                    .await;
                return self.finish(report, guard);
            }
            Err(e) => {
                log::error!("❌ [{}] Classification failed: {}", short_id(&report.session_id), e);
                self.track_cleanup(&request, &mut report, &mut guard);
                self.notify_request(&request, keys::UPLOAD_FAILED, &[], &mut report)
                    .await;
                return self.finish(report, guard);
            }
        };

        self.track_cleanup(&request, &mut report, &mut guard);

        if let Err(e) = InputValidator::validate_chat_id(request.chat_id) {
            log::error!("❌ [{}] {}", short_id(&report.session_id), e);
            return self.finish(report, guard);
        }

        report.enter(SessionState::Batching);
        if items.is_empty() {
            self.notify_request(&request, keys::NO_MEDIA, &[], &mut report)
                .await;
            return self.finish(report, guard);
        }

        let audio = audio_metadata(&request, &items);
        let caption = request
            .caption
            .as_deref()
            .and_then(InputValidator::sanitize_caption);
        let plan = make_batches(items, &self.inner.settings.limits, caption);
        report.skipped = plan.skipped.len();

        if plan.is_empty() {
            self.notify_request(&request, keys::NO_MEDIA, &[], &mut report)
                .await;
            return self.finish(report, guard);
        }

        let total = plan.sends.len();
        let pause = self.inner.settings.pacing.between_sends;

        for (i, sendable) in plan.sends.iter().enumerate() {
            report.enter(SessionState::Sending(i));
            log::info!(
                "📤 [{}] Send {}/{}: {}",
                short_id(&report.session_id),
                i + 1,
                total,
                sendable.label()
            );

            let result = self.inner.transport.send(request.chat_id, sendable, &audio).await;
            report.skipped += result.skipped_paths().len();

            match &result {
                DeliveryResult::Failed { error, .. } => {
                    let limit = self.inner.settings.error_text_limit;
                    let error = truncate_error_text(error, limit);
                    self.notify_request(&request, keys::ERROR_GENERAL, &[("e", error.as_str())], &mut report)
                        .await;
                }
                DeliveryResult::SentDegraded { failed, .. } if !failed.is_empty() => log::warn!(
                    "[{}] {} item(s) not delivered",
                    short_id(&report.session_id),
                    failed.len()
                ),
                _ => {}
            }

            let attempted = result.was_attempted();
            report.results.push(result);

            if attempted && i + 1 < total && !pause.is_zero() {
                sleep(pause).await;
            }
        }

        let attempted_any = report.results.iter().any(DeliveryResult::was_attempted);
        if !attempted_any {
            self.notify_request(&request, keys::NO_MEDIA, &[], &mut report)
                .await;
        } else if report.skipped > 0 && self.inner.settings.notify_skipped {
            let count = report.skipped.to_string();
            self.notify_request(&request, keys::FILES_SKIPPED, &[("count", count.as_str())], &mut report)
                .await;
        }

        log::info!(
            "✅ [{}] Finished: {} delivered, {} failed, {} skipped",
            short_id(&report.session_id),
            report.delivered(),
            report.failed(),
            report.skipped
        );

        self.finish(report, guard)
    }

    async fn classify(&self, request: &DeliveryRequest) -> AppResult<Vec<MediaItem>> {
        let source = request.source_path.clone();
        let hint = request.kind_hint;
        tokio::task::spawn_blocking(move || media::classify(&source, hint))
            .await
            .map_err(|e| AppError::Internal(format!("Classification task failed: {}", e)))?
    }

    fn track_cleanup(&self, request: &DeliveryRequest, report: &mut DeliveryReport, guard: &mut CleanupGuard) {
        let root = &self.inner.cleanup.settings().downloads_root;
        report.cleanup_target = cleanup_target(&request.source_path, root);
        guard.set_target(report.cleanup_target.clone());
    }

    fn finish(&self, mut report: DeliveryReport, guard: CleanupGuard) -> DeliveryReport {
        report.enter(SessionState::CleaningUp);
        if let Some(target) = guard.finish() {
            log::debug!("🧹 [{}] Cleanup queued for {}", short_id(&report.session_id), target.display());
        }
        report.enter(SessionState::Done);
        report
    }

    async fn notify_request(
        &self,
        request: &DeliveryRequest,
        key: &'static str,
        args: &[(&str, &str)],
        report: &mut DeliveryReport,
    ) {
        self.notify(request.chat_id, &request.language, key, args, report)
            .await
    }

    async fn notify(
        &self,
        chat_id: i64,
        language: &str,
        key: &'static str,
        args: &[(&str, &str)],
        report: &mut DeliveryReport,
    ) {
        report.notices.push(key);

        let text = fill(&self.inner.localizer.text(key, language), args);
        let Some(text) = InputValidator::sanitize_text(&text) else {
            return;
        };

        if let Err(e) = self.inner.transport.channel().send_text(chat_id, &text).await {
            log::error!("❌ Failed to send '{}' notice to chat {}: {}", key, chat_id, e);
        }
    }
}

/// Title/performer only apply when the source was a single audio file.
fn audio_metadata(request: &DeliveryRequest, items: &[MediaItem]) -> AudioMetadata {
    match items {
        [only] if only.path == request.source_path => AudioMetadata {
            title: request.title.clone(),
            performer: request.performer.clone(),
        },
        _ => AudioMetadata::default(),
    }
}

fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::BuiltinLocalizer;
    use crate::uploader::cleanup::CleanupSettings;
    use crate::uploader::transport::OutgoingMedia;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;

    #[derive(Default)]
    struct FakeChannel {
        fail_everything: bool,
        /// Grown past any ceiling once the first media send goes out.
        grow: Option<PathBuf>,
        /// Deleted once the first media send goes out.
        remove: Option<PathBuf>,
        log: Mutex<Vec<String>>,
        sent_at: Mutex<Vec<Instant>>,
    }

    impl FakeChannel {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
            self.sent_at.lock().unwrap().push(Instant::now());
            if let Some(path) = &self.grow {
                fs::write(path, vec![0u8; 1024]).unwrap();
            }
            if let Some(path) = &self.remove {
                let _ = fs::remove_file(path);
            }
        }
    }

    #[async_trait]
    impl MediaTransport for FakeChannel {
        async fn send_group(&self, _chat_id: i64, media: &[OutgoingMedia]) -> AppResult<()> {
            self.record(format!("group:{}", media.len()));
            if self.fail_everything {
                return Err(AppError::transport_failed("flood wait"));
            }
            Ok(())
        }

        async fn send_media(&self, _chat_id: i64, media: &OutgoingMedia) -> AppResult<()> {
            self.record(format!("{}", media.kind));
            if self.fail_everything {
                return Err(AppError::transport_failed("flood wait"));
            }
            Ok(())
        }

        async fn send_text(&self, _chat_id: i64, text: &str) -> AppResult<()> {
            self.log.lock().unwrap().push(format!("text:{}", text));
            Ok(())
        }
    }

    fn settings() -> DispatcherSettings {
        DispatcherSettings {
            pacing: Pacing {
                between_sends: Duration::ZERO,
                between_fallback_items: Duration::ZERO,
            },
            ..DispatcherSettings::default()
        }
    }

    fn dispatcher(channel: Arc<FakeChannel>, root: &Path) -> (Dispatcher, CleanupManager) {
        dispatcher_with(channel, root, settings())
    }

    fn dispatcher_with(
        channel: Arc<FakeChannel>,
        root: &Path,
        settings: DispatcherSettings,
    ) -> (Dispatcher, CleanupManager) {
        let cleanup = CleanupManager::start(CleanupSettings {
            downloads_root: root.to_path_buf(),
            delay: Duration::ZERO,
            permission_retry_delay: Duration::ZERO,
        });
        let dispatcher = Dispatcher::new(channel, Arc::new(BuiltinLocalizer), cleanup.clone(), settings);
        (dispatcher, cleanup)
    }

    #[tokio::test]
    async fn test_states_are_linear_for_a_normal_session() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join("insta_1");
        fs::create_dir(&session).unwrap();
        for name in ["a.jpg", "b.jpg", "c.mp3"] {
            fs::write(session.join(name), b"data").unwrap();
        }

        let channel = Arc::new(FakeChannel::default());
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let report = dispatcher.deliver(DeliveryRequest::new(7, &session)).await;

        // c.mp3 sorts after the photos
        assert_eq!(
            report.states,
            vec![
                SessionState::Created,
                SessionState::Classifying,
                SessionState::Batching,
                SessionState::Sending(0),
                SessionState::Sending(1),
                SessionState::CleaningUp,
                SessionState::Done,
            ]
        );
        assert_eq!(*channel.log.lock().unwrap(), vec!["group:2", "audio"]);

        cleanup.shutdown().await;
        assert!(!session.exists());
    }

    #[tokio::test]
    async fn test_missing_source_reports_not_found_without_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let channel = Arc::new(FakeChannel::default());
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let report = dispatcher
            .deliver(DeliveryRequest::new(7, root.path().join("nope")))
            .await;

        assert_eq!(report.notices, vec![keys::FILE_NOT_FOUND]);
        assert_eq!(report.cleanup_target, None);
        assert_eq!(report.final_state(), Some(SessionState::Done));
        assert!(!report.states.contains(&SessionState::Batching));
        assert_eq!(cleanup.shutdown().await, 0);
    }

    #[tokio::test]
    async fn test_empty_folder_still_passes_through_batching() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join("yt_3");
        fs::create_dir(&session).unwrap();
        fs::write(session.join("notes.txt"), b"not media").unwrap();

        let channel = Arc::new(FakeChannel::default());
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let report = dispatcher.deliver(DeliveryRequest::new(7, &session)).await;

        assert_eq!(
            report.states,
            vec![
                SessionState::Created,
                SessionState::Classifying,
                SessionState::Batching,
                SessionState::CleaningUp,
                SessionState::Done,
            ]
        );
        assert_eq!(report.notices, vec![keys::NO_MEDIA]);

        cleanup.shutdown().await;
        assert!(!session.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_paced_except_after_skips_and_the_last_send() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join("sc_4");
        fs::create_dir(&session).unwrap();
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            fs::write(session.join(name), b"id3").unwrap();
        }

        let channel = Arc::new(FakeChannel {
            grow: Some(session.join("b.mp3")),
            ..FakeChannel::default()
        });
        let (dispatcher, cleanup) = dispatcher_with(
            channel.clone(),
            root.path(),
            DispatcherSettings {
                limits: DeliveryLimits {
                    max_group_size: 10,
                    max_batch_bytes: 100,
                    max_single_file_bytes: 100,
                },
                pacing: Pacing {
                    between_sends: Duration::from_secs(2),
                    between_fallback_items: Duration::ZERO,
                },
                ..DispatcherSettings::default()
            },
        );

        let started = Instant::now();
        let report = dispatcher.deliver(DeliveryRequest::new(7, &session)).await;
        let elapsed = started.elapsed();

        assert!(matches!(report.results[1], DeliveryResult::Skipped { .. }));
        let sent_at = channel.sent_at.lock().unwrap().clone();
        assert_eq!(sent_at.len(), 2);
        assert!(sent_at[1] - sent_at[0] >= Duration::from_secs(2));
        assert!(sent_at[1] - sent_at[0] < Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(4));

        cleanup.shutdown().await;
    }

    #[tokio::test]
    async fn test_items_dropped_inside_a_group_are_counted() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join("ig_5");
        fs::create_dir(&session).unwrap();
        for name in ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg"] {
            fs::write(session.join(name), b"jpeg").unwrap();
        }

        let channel = Arc::new(FakeChannel {
            grow: Some(session.join("5.jpg")),
            remove: Some(session.join("6.jpg")),
            ..FakeChannel::default()
        });
        let (dispatcher, cleanup) = dispatcher_with(
            channel.clone(),
            root.path(),
            DispatcherSettings {
                limits: DeliveryLimits {
                    max_group_size: 3,
                    max_batch_bytes: 100,
                    max_single_file_bytes: 100,
                },
                ..settings()
            },
        );

        let report = dispatcher.deliver(DeliveryRequest::new(7, &session)).await;

        assert_eq!(
            report.results[1],
            DeliveryResult::SentDegraded {
                failed: vec![session.join("6.jpg")],
                skipped: vec![session.join("5.jpg")],
            }
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(report.notices, vec![keys::FILES_SKIPPED]);
        assert_eq!(
            *channel.log.lock().unwrap(),
            vec![
                "group:3",
                "photo",
                "text:⚠️ 1 file(s) were skipped because they are too large."
            ]
        );

        cleanup.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_reported_with_truncated_text() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("clip.mp4");
        fs::write(&file, b"video").unwrap();

        let channel = Arc::new(FakeChannel {
            fail_everything: true,
            ..FakeChannel::default()
        });
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let report = dispatcher.deliver(DeliveryRequest::new(7, &file)).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.notices, vec![keys::ERROR_GENERAL]);
        let log = channel.log.lock().unwrap().clone();
        assert!(log.last().unwrap().starts_with("text:❌ Error: Transport failed"));

        cleanup.shutdown().await;
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_partial_skip_sends_one_notice() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join("tt_2");
        fs::create_dir(&session).unwrap();
        fs::write(session.join("a.jpg"), vec![0u8; 10]).unwrap();
        fs::write(session.join("b.mp4"), vec![0u8; 100]).unwrap();

        let channel = Arc::new(FakeChannel::default());
        let cleanup = CleanupManager::start(CleanupSettings {
            downloads_root: root.path().to_path_buf(),
            delay: Duration::ZERO,
            permission_retry_delay: Duration::ZERO,
        });
        let dispatcher = Dispatcher::new(
            channel.clone(),
            Arc::new(BuiltinLocalizer),
            cleanup.clone(),
            DispatcherSettings {
                limits: DeliveryLimits {
                    max_group_size: 10,
                    max_batch_bytes: 40,
                    max_single_file_bytes: 50,
                },
                ..settings()
            },
        );

        let report = dispatcher.deliver(DeliveryRequest::new(7, &session)).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.notices, vec![keys::FILES_SKIPPED]);
        assert_eq!(
            channel.log.lock().unwrap().last().unwrap(),
            "text:⚠️ 1 file(s) were skipped because they are too large."
        );
        cleanup.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_download_outcome_only_notifies() {
        let root = tempfile::tempdir().unwrap();
        let channel = Arc::new(FakeChannel::default());
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let report = dispatcher
            .deliver_outcome(
                7,
                "ar",
                DownloadOutcome::FailedDownload {
                    reason: "private account".into(),
                },
            )
            .await;

        assert_eq!(report.notices, vec![keys::NO_MEDIA]);
        assert_eq!(
            *channel.log.lock().unwrap(),
            vec!["text:❌ لم يتم العثور على وسائط أو فشل التحميل."]
        );
        cleanup.shutdown().await;
    }

    #[tokio::test]
    async fn test_held_request_is_delivered_once() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("song.mp3");
        fs::write(&file, b"id3").unwrap();

        let channel = Arc::new(FakeChannel::default());
        let (dispatcher, cleanup) = dispatcher(channel.clone(), root.path());

        let token = dispatcher.hold(DeliveryRequest::new(7, &file)).unwrap();
        let report = dispatcher.deliver_held(token).await.unwrap();
        assert_eq!(report.delivered(), 1);
        assert!(dispatcher.deliver_held(token).await.is_none());

        cleanup.shutdown().await;
    }

    #[test]
    fn test_audio_metadata_only_for_single_file_sources() {
        let mut request = DeliveryRequest::new(1, "/d/x/song.mp3");
        request.title = Some("Song".into());

        let single = vec![MediaItem {
            path: PathBuf::from("/d/x/song.mp3"),
            kind: MediaKind::Audio,
            size_bytes: 1,
            thumbnail_path: None,
        }];
        assert_eq!(audio_metadata(&request, &single).title.as_deref(), Some("Song"));

        request.source_path = PathBuf::from("/d/x");
        assert_eq!(audio_metadata(&request, &single), AudioMetadata::default());
    }
}
