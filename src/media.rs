//! Classification of a delivered path into an ordered list of media items.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{AppError, AppResult};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v"];
/// Ordered by preference when picking a video's thumbnail.
pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Photo,
    Audio,
}

impl MediaKind {
    /// Case-insensitive extension lookup.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        let ext = ext.as_str();

        if VIDEO_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Video)
        } else if PHOTO_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Photo)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Photo => "photo",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "photo" => Ok(MediaKind::Photo),
            "audio" => Ok(MediaKind::Audio),
            other => Err(AppError::validation(
                "media_kind",
                &format!("Unknown media kind '{}'", other),
            )),
        }
    }
}

/// One deliverable file. `size_bytes` is measured once at classification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub thumbnail_path: Option<PathBuf>,
}

impl MediaItem {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

/// Turns a file or directory into the ordered list of items to deliver.
///
/// A missing path is an error; a directory with nothing recognisable is an
/// empty list. Blocking: call from `spawn_blocking` inside async code.
pub fn classify(path: &Path, hint: Option<MediaKind>) -> AppResult<Vec<MediaItem>> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::not_found(&path.to_string_lossy()),
        _ => AppError::Io(e),
    })?;

    if metadata.is_dir() {
        classify_directory(path)
    } else {
        let Some(kind) = MediaKind::from_extension(path).or(hint) else {
            log::warn!("Unrecognised media file: {}", path.display());
            return Ok(Vec::new());
        };

        Ok(vec![MediaItem {
            path: path.to_path_buf(),
            kind,
            size_bytes: metadata.len(),
            thumbnail_path: None,
        }])
    }
}

fn classify_directory(directory: &Path) -> AppResult<Vec<MediaItem>> {
    let mut candidates: Vec<(PathBuf, MediaKind, u64)> = Vec::new();

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        // Hidden files are derived artefacts (e.g. normalised thumbnails)
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        if let Some(kind) = MediaKind::from_extension(&path) {
            candidates.push((path, kind, metadata.len()));
        }
    }

    candidates.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));

    // Photo stems that share a base name with a video are thumbnails
    let video_stems: Vec<String> = candidates
        .iter()
        .filter(|(_, kind, _)| *kind == MediaKind::Video)
        .filter_map(|(path, _, _)| stem_of(path))
        .collect();

    let mut thumbnails: HashMap<String, PathBuf> = HashMap::new();
    for ext in PHOTO_EXTENSIONS {
        for (path, kind, _) in &candidates {
            if *kind != MediaKind::Photo || !has_extension(path, ext) {
                continue;
            }
            if let Some(stem) = stem_of(path) {
                if video_stems.contains(&stem) {
                    thumbnails.entry(stem).or_insert_with(|| path.clone());
                }
            }
        }
    }

    let mut items = Vec::with_capacity(candidates.len());
    for (path, kind, size_bytes) in candidates {
        let stem = stem_of(&path);

        match kind {
            MediaKind::Photo => {
                if stem.map(|s| video_stems.contains(&s)).unwrap_or(false) {
                    log::debug!("Treating {} as a video thumbnail", path.display());
                    continue;
                }
                items.push(MediaItem {
                    path,
                    kind,
                    size_bytes,
                    thumbnail_path: None,
                });
            }
            MediaKind::Video => {
                let thumbnail_path = stem.and_then(|s| thumbnails.get(&s).cloned());
                items.push(MediaItem {
                    path,
                    kind,
                    size_bytes,
                    thumbnail_path,
                });
            }
            MediaKind::Audio => items.push(MediaItem {
                path,
                kind,
                size_bytes,
                thumbnail_path: None,
            }),
        }
    }

    log::info!(
        "Classified {} media item(s) in {}",
        items.len(),
        directory.display()
    );

    Ok(items)
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
