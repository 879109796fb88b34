//! User-facing message lookup.
//!
//! The pipeline only needs a handful of keys; the bot layer can plug in its own
//! provider through [`Localizer`].

pub const DEFAULT_LANGUAGE: &str = "en";

pub mod keys {
    pub const FILE_NOT_FOUND: &str = "error_file_not_found";
    pub const NO_MEDIA: &str = "no_media";
    pub const UPLOAD_FAILED: &str = "upload_failed";
    pub const ERROR_GENERAL: &str = "error_general";
    pub const FILES_SKIPPED: &str = "files_skipped";
}

/// Maps a message key and language code to display text. Never fails.
pub trait Localizer: Send + Sync {
    fn text(&self, key: &str, lang: &str) -> String;
}

/// Built-in English/Arabic strings for the keys the delivery pipeline sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLocalizer;

impl BuiltinLocalizer {
    fn lookup(key: &str, lang: &str) -> Option<&'static str> {
        let text = match (lang, key) {
            ("en", keys::FILE_NOT_FOUND) => "❌ File not found.",
            ("en", keys::NO_MEDIA) => "❌ No media found or download failed.",
            ("en", keys::UPLOAD_FAILED) => "❌ Upload failed. Please try again.",
            ("en", keys::ERROR_GENERAL) => "❌ Error: {e}",
            ("en", keys::FILES_SKIPPED) => "⚠️ {count} file(s) were skipped because they are too large.",
            ("ar", keys::FILE_NOT_FOUND) => "❌ الملف غير موجود.",
            ("ar", keys::NO_MEDIA) => "❌ لم يتم العثور على وسائط أو فشل التحميل.",
            ("ar", keys::UPLOAD_FAILED) => "❌ فشل الرفع. حاول مرة أخرى.",
            ("ar", keys::ERROR_GENERAL) => "❌ خطأ: {e}",
            ("ar", keys::FILES_SKIPPED) => "⚠️ تم تخطي {count} ملف(ات) لأن حجمها كبير جداً.",
            _ => return None,
        };
        Some(text)
    }
}

impl Localizer for BuiltinLocalizer {
    fn text(&self, key: &str, lang: &str) -> String {
        Self::lookup(key, lang)
            .or_else(|| Self::lookup(key, DEFAULT_LANGUAGE))
            .map(str::to_string)
            .unwrap_or_else(|| key.to_string())
    }
}

/// Replaces `{name}` placeholders in a localized template.
pub fn fill(template: &str, args: &[(&str, &str)]) -> String {
    args.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_language_falls_back_to_english() {
        let l = BuiltinLocalizer;
        assert_eq!(l.text(keys::NO_MEDIA, "de"), l.text(keys::NO_MEDIA, "en"));
    }

    #[test]
    fn test_unknown_key_returns_key() {
        assert_eq!(BuiltinLocalizer.text("nope", "ar"), "nope");
    }

    #[test]
    fn test_fill_placeholders() {
        let text = fill(
            &BuiltinLocalizer.text(keys::ERROR_GENERAL, "en"),
            &[("e", "timeout")],
        );
        assert_eq!(text, "❌ Error: timeout");
    }
}
