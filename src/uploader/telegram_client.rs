use async_trait::async_trait;
use reqwest::{multipart, Body, Client, StatusCode};
use serde::Deserialize;
use std::cmp::min;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

use crate::errors::{AppError, AppResult};
use crate::media::MediaKind;
use crate::security::InputValidator;

use super::transport::{MediaTransport, OutgoingMedia};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout: Duration,
    /// Minimum spacing between two requests to the same chat.
    pub min_request_interval: Duration,
    pub max_retries: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.telegram.org".to_string(),
            request_timeout: Duration::from_secs(120),
            min_request_interval: Duration::from_millis(1000),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Bot API client with per-chat rate limiting and retry on flood/server errors
pub struct TelegramClient {
    client: Client,
    token: String,
    api_base_url: String,
    min_request_interval: Duration,
    rate_limiter: Arc<Mutex<HashMap<i64, Instant>>>,
    retry_config: RetryConfig,
}

impl TelegramClient {
    pub fn new(token: &str, settings: &ClientSettings) -> AppResult<Self> {
        InputValidator::validate_bot_token(token)?;

        let client = Client::builder().timeout(settings.request_timeout).build()?;

        Ok(Self {
            client,
            token: token.trim().to_string(),
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            min_request_interval: settings.min_request_interval,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
            retry_config: RetryConfig {
                max_retries: settings.max_retries,
                ..RetryConfig::default()
            },
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// `sendMediaGroup` for 2..=10 photos/videos.
    pub async fn send_media_group(&self, chat_id: i64, media: &[OutgoingMedia]) -> AppResult<()> {
        if media.len() < 2 {
            return Err(AppError::validation(
                "media",
                "A media group needs at least two items",
            ));
        }

        let mut payload = UploadPayload::new();
        payload.add_text_field("chat_id", chat_id.to_string());

        let mut entries = Vec::with_capacity(media.len());
        for (i, item) in media.iter().enumerate() {
            let media_type = match item.kind {
                MediaKind::Photo => "photo",
                MediaKind::Video => "video",
                MediaKind::Audio => {
                    return Err(AppError::validation(
                        "media",
                        "Audio cannot be part of a media group",
                    ))
                }
            };

            let file_field = format!("file{}", i);
            payload.add_file(&item.path, &file_field);

            let mut entry = serde_json::json!({
                "type": media_type,
                "media": format!("attach://{}", file_field),
            });

            if let Some(caption) = item.caption.as_deref().and_then(InputValidator::sanitize_caption) {
                entry["caption"] = serde_json::Value::String(caption);
            }

            if item.kind == MediaKind::Video {
                entry["supports_streaming"] = serde_json::Value::Bool(true);
                if let Some(thumb) = &item.thumbnail_path {
                    let thumb_field = format!("thumb{}", i);
                    payload.add_file(thumb, &thumb_field);
                    entry["thumbnail"] =
                        serde_json::Value::String(format!("attach://{}", thumb_field));
                }
            }

            entries.push(entry);
        }

        payload.add_text_field("media", serde_json::Value::Array(entries).to_string());

        log::info!(
            "📤 sendMediaGroup: {} items to chat {}",
            media.len(),
            chat_id
        );
        self.call(chat_id, "sendMediaGroup", &payload).await
    }

    /// `sendPhoto` / `sendVideo` / `sendAudio` depending on the item kind.
    pub async fn send_single(&self, chat_id: i64, media: &OutgoingMedia) -> AppResult<()> {
        let mut payload = UploadPayload::new();
        payload.add_text_field("chat_id", chat_id.to_string());

        if let Some(caption) = media.caption.as_deref().and_then(InputValidator::sanitize_caption) {
            payload.add_text_field("caption", caption);
        }

        let method = match media.kind {
            MediaKind::Photo => {
                payload.add_file(&media.path, "photo");
                "sendPhoto"
            }
            MediaKind::Video => {
                payload.add_file(&media.path, "video");
                payload.add_text_field("supports_streaming", "true".to_string());
                if let Some(thumb) = &media.thumbnail_path {
                    payload.add_file(thumb, "thumbnail");
                }
                "sendVideo"
            }
            MediaKind::Audio => {
                payload.add_file(&media.path, "audio");
                if let Some(title) = &media.title {
                    payload.add_text_field("title", title.clone());
                }
                if let Some(performer) = &media.performer {
                    payload.add_text_field("performer", performer.clone());
                }
                "sendAudio"
            }
        };

        log::info!(
            "📤 {}: {} to chat {}",
            method,
            media.path.display(),
            chat_id
        );
        self.call(chat_id, method, &payload).await
    }

    pub async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()> {
        let Some(text) = InputValidator::sanitize_text(text) else {
            return Ok(());
        };

        let mut payload = UploadPayload::new();
        payload.add_text_field("chat_id", chat_id.to_string());
        payload.add_text_field("text", text);

        self.call(chat_id, "sendMessage", &payload).await
    }

    async fn call(&self, chat_id: i64, method: &str, payload: &UploadPayload) -> AppResult<()> {
        self.wait_for_rate_limit(chat_id).await;

        // The URL embeds the bot token; never log it
        let url = format!("{}/bot{}/{}", self.api_base_url, self.token, method);
        let mut attempt = 0;

        loop {
            let form = payload.build_form().await?;
            let response = match self.client.post(&url).multipart(form).send().await {
                Ok(response) => response,
                Err(e) => {
                    let error = AppError::from(e);
                    attempt += 1;
                    if error.is_retryable() && attempt <= self.retry_config.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        log::warn!(
                            "{} attempt {} could not reach the API, retrying in {:?}: {}",
                            method,
                            attempt,
                            delay,
                            error
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(error);
                }
            };

            self.update_rate_limit(chat_id);

            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let parsed = serde_json::from_str::<ApiResponse>(&body).ok();

            if status.is_success() && parsed.as_ref().map(|r| r.ok).unwrap_or(false) {
                log::debug!("{} succeeded for chat {}", method, chat_id);
                return Ok(());
            }

            let description = parsed
                .as_ref()
                .and_then(|r| r.description.clone())
                .unwrap_or_else(|| body.chars().take(300).collect());
            let error = AppError::transport_failed(format!(
                "Telegram API error {} on {}: {}",
                status, method, description
            ));

            attempt += 1;
            if should_retry_error(status) && attempt <= self.retry_config.max_retries {
                let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                    parsed
                        .as_ref()
                        .and_then(|r| r.parameters.as_ref())
                        .and_then(|p| p.retry_after)
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.calculate_backoff_delay(attempt))
                } else {
                    self.calculate_backoff_delay(attempt)
                };

                log::warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    method,
                    attempt,
                    delay,
                    error
                );
                sleep(delay).await;
                continue;
            }

            log::error!("❌ {} failed for chat {}: {}", method, chat_id, error);
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_ms = parsed
                    .as_ref()
                    .and_then(|r| r.parameters.as_ref())
                    .and_then(|p| p.retry_after)
                    .unwrap_or(0)
                    * 1000;
                return Err(AppError::RateLimit { retry_after_ms });
            }
            return Err(error);
        }
    }

    async fn wait_for_rate_limit(&self, chat_id: i64) {
        let wait_time = {
            match self.rate_limiter.lock() {
                Ok(rate_limiter) => rate_limiter.get(&chat_id).and_then(|last_request| {
                    let elapsed = last_request.elapsed();
                    if elapsed < self.min_request_interval {
                        Some(self.min_request_interval - elapsed)
                    } else {
                        None
                    }
                }),
                Err(e) => {
                    log::warn!("Failed to acquire rate limiter lock (non-critical): {}", e);
                    None
                }
            }
        }; // MutexGuard is dropped here

        if let Some(wait_time) = wait_time {
            sleep(wait_time).await;
        }
    }

    fn update_rate_limit(&self, chat_id: i64) {
        match self.rate_limiter.lock() {
            Ok(mut rate_limiter) => {
                rate_limiter.insert(chat_id, Instant::now());
            }
            Err(e) => {
                log::warn!("Failed to update rate limiter (non-critical): {}", e);
            }
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.retry_config.base_delay.as_millis() as f64
            * self.retry_config.exponential_base.powi(attempt as i32 - 1);

        let delay = Duration::from_millis(delay_ms as u64);
        min(delay, self.retry_config.max_delay)
    }
}

#[async_trait]
impl MediaTransport for TelegramClient {
    async fn send_group(&self, chat_id: i64, media: &[OutgoingMedia]) -> AppResult<()> {
        self.send_media_group(chat_id, media).await
    }

    async fn send_media(&self, chat_id: i64, media: &OutgoingMedia) -> AppResult<()> {
        self.send_single(chat_id, media).await
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()> {
        TelegramClient::send_text(self, chat_id, text).await
    }
}

/// Helper struct to hold upload payload data
///
/// Files are referenced by path and streamed from disk on every attempt.
#[derive(Debug, Clone, Default)]
pub struct UploadPayload {
    files: Vec<(PathBuf, String)>, // (path, field_name)
    text_fields: Vec<(String, String)>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text_field(&mut self, key: &str, value: String) {
        self.text_fields.push((key.to_string(), value));
    }

    pub fn add_file(&mut self, path: &Path, field_name: &str) {
        self.files.push((path.to_path_buf(), field_name.to_string()));
    }

    pub async fn build_form(&self) -> AppResult<multipart::Form> {
        let mut form = multipart::Form::new();

        for (key, value) in &self.text_fields {
            form = form.text(key.clone(), value.clone());
        }

        for (path, field_name) in &self.files {
            let file = tokio::fs::File::open(path).await?;
            let length = file.metadata().await?.len();
            let filename = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();

            let part = multipart::Part::stream_with_length(Body::from(file), length)
                .file_name(filename)
                .mime_str(mime_type_for(path))?;

            form = form.part(field_name.clone(), part);
        }

        Ok(form)
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn should_retry_error(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}
