use image::codecs::jpeg::JpegEncoder;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::AppResult;
use crate::security::FileSystemGuard;

/// Telegram ignores video thumbnails larger than this on either side.
pub const MAX_THUMBNAIL_DIMENSION: u32 = 320;
/// Telegram ignores video thumbnails heavier than this.
pub const MAX_THUMBNAIL_BYTES: u64 = 200 * 1024;

const THUMBNAIL_QUALITY: u8 = 85;

/// Returns a thumbnail the transport will accept, re-encoding when needed.
///
/// The normalised copy is written as a hidden sibling (`.<stem>.thumb.jpg`) so
/// it lives and dies with the session directory.
pub fn prepare_thumbnail(source: &Path) -> AppResult<PathBuf> {
    if is_acceptable(source)? {
        return Ok(source.to_path_buf());
    }

    let img = image::open(source)?;
    let thumbnail = img
        .thumbnail(MAX_THUMBNAIL_DIMENSION, MAX_THUMBNAIL_DIMENSION)
        .to_rgb8();

    let output_path = normalized_path(source);
    let file = fs::File::create(&output_path)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, THUMBNAIL_QUALITY).encode_image(&thumbnail)?;
    writer.flush()?;

    log::debug!(
        "Re-encoded thumbnail {} -> {} ({}x{})",
        source.display(),
        output_path.display(),
        thumbnail.width(),
        thumbnail.height()
    );

    Ok(output_path)
}

fn is_acceptable(source: &Path) -> AppResult<bool> {
    let is_jpeg = source
        .extension()
        .map(|e| {
            let e = e.to_string_lossy();
            e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg")
        })
        .unwrap_or(false);

    if !is_jpeg || FileSystemGuard::get_file_size(source)? > MAX_THUMBNAIL_BYTES {
        return Ok(false);
    }

    let (width, height) = image::image_dimensions(source)?;
    Ok(width <= MAX_THUMBNAIL_DIMENSION && height <= MAX_THUMBNAIL_DIMENSION)
}

fn normalized_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    source.with_file_name(format!(".{}.thumb.jpg", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn write_image(path: &Path, width: u32, height: u32, format: ImageFormat) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 255) as u8, (y % 255) as u8, 128])
        });
        img.save_with_format(path, format).unwrap();
    }

    #[test]
    fn test_small_jpeg_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.jpg");
        write_image(&path, 100, 60, ImageFormat::Jpeg);

        assert_eq!(prepare_thumbnail(&path).unwrap(), path);
    }

    #[test]
    fn test_large_png_is_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.png");
        write_image(&path, 1280, 720, ImageFormat::Png);

        let prepared = prepare_thumbnail(&path).unwrap();
        assert_eq!(prepared, dir.path().join(".clip.thumb.jpg"));

        let (w, h) = image::image_dimensions(&prepared).unwrap();
        assert!(w <= MAX_THUMBNAIL_DIMENSION && h <= MAX_THUMBNAIL_DIMENSION);
        assert!(fs::metadata(&prepared).unwrap().len() <= MAX_THUMBNAIL_BYTES);
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.webp");
        fs::write(&path, b"not an image").unwrap();

        assert!(prepare_thumbnail(&path).is_err());
    }
}
