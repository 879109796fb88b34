use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::errors::{AppError, AppResult};
use crate::media::{MediaItem, MediaKind};
use crate::thumbnail;

use super::batcher::{Batch, Sendable};

/// One file as the messaging channel sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub caption: Option<String>,
    pub title: Option<String>,
    pub performer: Option<String>,
}

/// Raw sends offered by a messaging channel.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// One grouped message holding every item (photos and videos only).
    async fn send_group(&self, chat_id: i64, media: &[OutgoingMedia]) -> AppResult<()>;

    async fn send_media(&self, chat_id: i64, media: &OutgoingMedia) -> AppResult<()>;

    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()>;
}

/// Title/performer shown for audio sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub performer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Sent,
    /// Went out, but not in full: `failed` did not make it (group fallback
    /// failures or files that vanished), `skipped` grew past the ceiling.
    SentDegraded {
        failed: Vec<PathBuf>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        skipped: Vec<PathBuf>,
    },
    /// Over the hard size ceiling, never attempted.
    Skipped { paths: Vec<PathBuf> },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        skipped: Vec<PathBuf>,
    },
}

impl DeliveryResult {
    pub fn failed(error: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            error: error.into(),
            skipped: Vec::new(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Sent | DeliveryResult::SentDegraded { .. })
    }

    /// Whether a request actually went out (and pacing applies afterwards).
    pub fn was_attempted(&self) -> bool {
        !matches!(self, DeliveryResult::Skipped { .. })
    }

    /// Paths refused by the size ceiling, whatever happened to the rest.
    pub fn skipped_paths(&self) -> &[PathBuf] {
        match self {
            DeliveryResult::Sent => &[],
            DeliveryResult::SentDegraded { skipped, .. } => skipped,
            DeliveryResult::Skipped { paths } => paths,
            DeliveryResult::Failed { skipped, .. } => skipped,
        }
    }

    /// Folds items dropped before a group went out into the group's result.
    fn with_dropped(self, missing: Vec<PathBuf>, skipped: Vec<PathBuf>) -> Self {
        if missing.is_empty() && skipped.is_empty() {
            return self;
        }
        match self {
            DeliveryResult::Sent => DeliveryResult::SentDegraded {
                failed: missing,
                skipped,
            },
            DeliveryResult::SentDegraded { mut failed, .. } => {
                failed.extend(missing);
                DeliveryResult::SentDegraded { failed, skipped }
            }
            DeliveryResult::Failed { error, .. } => DeliveryResult::Failed { error, skipped },
            DeliveryResult::Skipped { mut paths } => {
                paths.extend(skipped);
                DeliveryResult::Skipped { paths }
            }
        }
    }
}

/// Sends batches and singletons, degrading failed groups to per-item sends.
pub struct Transport {
    inner: Arc<dyn MediaTransport>,
    max_single_file_bytes: u64,
    between_fallback_items: Duration,
}

impl Transport {
    pub fn new(
        inner: Arc<dyn MediaTransport>,
        max_single_file_bytes: u64,
        between_fallback_items: Duration,
    ) -> Self {
        Self {
            inner,
            max_single_file_bytes,
            between_fallback_items,
        }
    }

    pub fn channel(&self) -> &Arc<dyn MediaTransport> {
        &self.inner
    }

    pub async fn send(
        &self,
        chat_id: i64,
        sendable: &Sendable,
        audio: &AudioMetadata,
    ) -> DeliveryResult {
        match sendable {
            Sendable::Single { item, caption } => {
                if let Err(result) = self.check_ceiling(item).await {
                    return result;
                }
                let media = self.outgoing(item, caption.clone(), audio).await;
                self.send_one(chat_id, &media).await
            }
            Sendable::Batch(batch) => self.send_batch(chat_id, batch, audio).await,
        }
    }

    async fn send_batch(&self, chat_id: i64, batch: &Batch, audio: &AudioMetadata) -> DeliveryResult {
        let mut accepted: Vec<&MediaItem> = Vec::with_capacity(batch.items.len());
        let mut skipped = Vec::new();
        let mut missing = Vec::new();

        for item in &batch.items {
            match self.check_ceiling(item).await {
                Ok(()) => accepted.push(item),
                Err(DeliveryResult::Skipped { paths }) => skipped.extend(paths),
                Err(_) => {
                    log::warn!("File disappeared before sending: {}", item.path.display());
                    missing.push(item.path.clone());
                }
            }
        }

        if accepted.is_empty() {
            return if missing.is_empty() {
                DeliveryResult::Skipped { paths: skipped }
            } else {
                DeliveryResult::Failed {
                    error: format!("{} file(s) disappeared before sending", missing.len()),
                    skipped,
                }
            };
        }

        let mut media = Vec::with_capacity(accepted.len());
        let mut caption = batch.caption.clone();
        for item in accepted {
            media.push(self.outgoing(item, caption.take(), audio).await);
        }

        let result = if media.len() == 1 {
            self.send_one(chat_id, &media[0]).await
        } else {
            match self.inner.send_group(chat_id, &media).await {
                Ok(()) => {
                    log::info!("✅ Sent media group with {} items", media.len());
                    DeliveryResult::Sent
                }
                Err(e) => {
                    log::warn!(
                        "❌ Media group of {} failed ({}), sending items individually",
                        media.len(),
                        e
                    );
                    self.fallback(chat_id, &media, &e.to_string()).await
                }
            }
        };

        result.with_dropped(missing, skipped)
    }

    async fn fallback(&self, chat_id: i64, media: &[OutgoingMedia], group_error: &str) -> DeliveryResult {
        let mut failed = Vec::new();

        for (i, item) in media.iter().enumerate() {
            if i > 0 && !self.between_fallback_items.is_zero() {
                sleep(self.between_fallback_items).await;
            }

            if let Err(e) = self.inner.send_media(chat_id, item).await {
                log::warn!("Fallback upload failed for {}: {}", item.path.display(), e);
                failed.push(item.path.clone());
            }
        }

        if failed.len() == media.len() {
            DeliveryResult::failed(group_error)
        } else {
            log::info!(
                "Fallback delivered {} of {} items",
                media.len() - failed.len(),
                media.len()
            );
            DeliveryResult::SentDegraded {
                failed,
                skipped: Vec::new(),
            }
        }
    }

    async fn send_one(&self, chat_id: i64, media: &OutgoingMedia) -> DeliveryResult {
        match self.inner.send_media(chat_id, media).await {
            Ok(()) => {
                log::info!("✅ Uploaded: {}", file_name(&media.path));
                DeliveryResult::Sent
            }
            Err(e) => {
                log::error!("❌ Failed to upload {}: {}", media.path.display(), e);
                DeliveryResult::failed(e.to_string())
            }
        }
    }

    /// Re-reads the size on disk; the batcher's snapshot could be stale.
    async fn check_ceiling(&self, item: &MediaItem) -> Result<(), DeliveryResult> {
        match tokio::fs::metadata(&item.path).await {
            Ok(metadata) if metadata.len() > self.max_single_file_bytes => {
                log::warn!(
                    "Refusing to send: {} (ceiling {} bytes)",
                    AppError::file_too_large(&item.path.to_string_lossy(), metadata.len()),
                    self.max_single_file_bytes
                );
                Err(DeliveryResult::Skipped {
                    paths: vec![item.path.clone()],
                })
            }
            Ok(_) => Ok(()),
            Err(e) => Err(DeliveryResult::failed(format!("{}: {}", item.path.display(), e))),
        }
    }

    async fn outgoing(
        &self,
        item: &MediaItem,
        caption: Option<String>,
        audio: &AudioMetadata,
    ) -> OutgoingMedia {
        let thumbnail_path = match (&item.kind, &item.thumbnail_path) {
            (MediaKind::Video, Some(thumb)) => prepared_thumbnail(thumb.clone()).await,
            _ => None,
        };
        let (title, performer) = if item.kind == MediaKind::Audio {
            (audio.title.clone(), audio.performer.clone())
        } else {
            (None, None)
        };

        OutgoingMedia {
            kind: item.kind,
            path: item.path.clone(),
            thumbnail_path,
            caption,
            title,
            performer,
        }
    }
}

async fn prepared_thumbnail(source: PathBuf) -> Option<PathBuf> {
    let display = source.display().to_string();
    match tokio::task::spawn_blocking(move || thumbnail::prepare_thumbnail(&source)).await {
        Ok(Ok(path)) => Some(path),
        Ok(Err(e)) => {
            log::warn!("Unusable thumbnail {}, sending without: {}", display, e);
            None
        }
        Err(e) => {
            log::warn!("Thumbnail task for {} failed: {}", display, e);
            None
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
