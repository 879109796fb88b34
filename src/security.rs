use regex::Regex;
use std::path::{Component, Path};

use crate::errors::{AppError, AppResult};
use crate::uploader::batcher::DeliveryLimits;

/// Telegram rejects captions longer than this many characters.
pub const MAX_CAPTION_CHARS: usize = 1024;
/// Telegram rejects text messages longer than this many characters.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Hard ceiling for group sizes accepted by `sendMediaGroup`.
pub const MAX_GROUP_ITEMS: usize = 10;

pub struct InputValidator;

impl InputValidator {
    pub fn validate_bot_token(token: &str) -> AppResult<()> {
        let trimmed = token.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("bot_token", "Bot token cannot be empty"));
        }

        let token_pattern = Regex::new(r"^\d{5,15}:[A-Za-z0-9_-]{30,64}$")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        if !token_pattern.is_match(trimmed) {
            return Err(AppError::validation(
                "bot_token",
                "Bot token must look like <bot id>:<secret>",
            ));
        }

        Ok(())
    }

    pub fn validate_chat_id(chat_id: i64) -> AppResult<()> {
        if chat_id == 0 {
            return Err(AppError::validation("chat_id", "Chat id cannot be 0"));
        }
        Ok(())
    }

    /// Rejects relative paths and paths that walk upwards.
    pub fn validate_source_path(path: &Path) -> AppResult<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::validation("source_path", "Path cannot be empty"));
        }

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(AppError::validation(
                "source_path",
                "Invalid path detected (parent directory traversal)",
            ));
        }

        Ok(())
    }

    pub fn validate_limits(limits: &DeliveryLimits) -> AppResult<()> {
        if limits.max_group_size == 0 || limits.max_group_size > MAX_GROUP_ITEMS {
            return Err(AppError::validation(
                "max_group_size",
                "Must be between 1 and 10",
            ));
        }

        if limits.max_batch_bytes == 0 {
            return Err(AppError::validation(
                "max_batch_bytes",
                "Must be greater than 0",
            ));
        }

        if limits.max_batch_bytes > limits.max_single_file_bytes {
            return Err(AppError::validation(
                "max_batch_bytes",
                "Must not exceed max_single_file_bytes",
            ));
        }

        Ok(())
    }

    /// Strips control characters (newlines and tabs survive) and bounds the length.
    pub fn sanitize_caption(caption: &str) -> Option<String> {
        Self::sanitize_bounded(caption, MAX_CAPTION_CHARS)
    }

    pub fn sanitize_text(text: &str) -> Option<String> {
        Self::sanitize_bounded(text, MAX_TEXT_CHARS)
    }

    fn sanitize_bounded(input: &str, max_chars: usize) -> Option<String> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();

        if cleaned.is_empty() {
            return None;
        }

        if cleaned.chars().count() > max_chars {
            let mut cut: String = cleaned.chars().take(max_chars - 1).collect();
            cut.push('…');
            Some(cut)
        } else {
            Some(cleaned)
        }
    }
}

// File system security utilities
pub struct FileSystemGuard;

impl FileSystemGuard {
    pub fn get_file_size(path: &Path) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }

    /// True when `path` exists and resolves to a location strictly below `root`.
    pub fn is_within_root(path: &Path, root: &Path) -> bool {
        let (Ok(path), Ok(root)) = (path.canonicalize(), root.canonicalize()) else {
            return false;
        };
        path != root && path.starts_with(&root)
    }
}
