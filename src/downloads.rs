use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::media::MediaKind;

/// Display metadata a downloader may attach to its result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub caption: Option<String>,
    pub title: Option<String>,
    pub performer: Option<String>,
    /// Kind to assume when a single file has an unrecognised extension.
    pub kind_hint: Option<MediaKind>,
}

/// What a platform downloader hands to the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    SingleFile {
        path: PathBuf,
        metadata: DownloadMetadata,
    },
    Carousel {
        directory: PathBuf,
        metadata: DownloadMetadata,
    },
    FailedDownload {
        reason: String,
    },
}

impl DownloadOutcome {
    /// Classifies a path returned by an untyped downloader.
    pub fn from_path(path: impl Into<PathBuf>, metadata: DownloadMetadata) -> Self {
        let path = path.into();
        if path.is_dir() {
            DownloadOutcome::Carousel {
                directory: path,
                metadata,
            }
        } else {
            DownloadOutcome::SingleFile { path, metadata }
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::SingleFile { path, .. } => Some(path),
            DownloadOutcome::Carousel { directory, .. } => Some(directory),
            DownloadOutcome::FailedDownload { .. } => None,
        }
    }
}

/// Builds a fresh per-request directory below `root`, e.g. `downloads/tiktok_<uuid>`.
///
/// The directory is not created; downloaders create it when they write.
pub fn generate_target_dir(root: &Path, platform_name: &str) -> PathBuf {
    let request_id = uuid::Uuid::new_v4();
    root.join(format!("{}_{}", platform_name, request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_dirs_are_unique_and_rooted() {
        let root = Path::new("/srv/downloads");
        let a = generate_target_dir(root, "tiktok");
        let b = generate_target_dir(root, "tiktok");

        assert_ne!(a, b);
        assert!(a.starts_with(root));
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tiktok_"));
    }

    #[test]
    fn test_from_path_picks_variant() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"data").unwrap();

        assert!(matches!(
            DownloadOutcome::from_path(dir.path(), DownloadMetadata::default()),
            DownloadOutcome::Carousel { .. }
        ));
        assert!(matches!(
            DownloadOutcome::from_path(&file, DownloadMetadata::default()),
            DownloadOutcome::SingleFile { .. }
        ));
        assert_eq!(
            DownloadOutcome::FailedDownload {
                reason: "private".into()
            }
            .source_path(),
            None
        );
    }
}
