//! Input validation helpers: request uuids, upload filenames, upload limits.

use std::sync::LazyLock;

use regex::Regex;
use uuid::{Uuid, Version};

use crate::error::CoreError;

static FILENAME_STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid regex"));

/// Filename used when sanitising leaves nothing behind.
const FALLBACK_FILENAME: &str = "upload";

/// Parse a version 4 uuid, returning `None` for any other input.
pub fn parse_uuid_v4(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim())
        .ok()
        .filter(|u| u.get_version() == Some(Version::Random))
}

/// Validate the `<uuid>` path parameter of result endpoints.
pub fn validate_uuid(raw: &str) -> Result<Uuid, CoreError> {
    parse_uuid_v4(raw)
        .ok_or_else(|| CoreError::Validation("The provided URL does not contain a valid UUID".into()))
}

/// Reduce an uploaded filename to a safe ASCII basename.
///
/// Path separators become underscores, anything outside `[A-Za-z0-9_.-]`
/// is dropped, and leading/trailing dots and underscores are trimmed.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = FILENAME_STRIP_RE.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Filename without its last extension, used for bundle entry names.
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

/// Synchronous limits checked before any upload is stored.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_pixels_per_image: u64,
}

impl UploadLimits {
    pub fn check_file_count(&self, count: usize) -> Result<(), CoreError> {
        if count == 0 {
            return Err(CoreError::Validation("No files were uploaded.".into()));
        }
        if count > self.max_files {
            return Err(CoreError::UploadLimits(format!(
                "You can only upload up to {} files at once.",
                self.max_files
            )));
        }
        Ok(())
    }

    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), CoreError> {
        if width as u64 * height as u64 > self.max_pixels_per_image {
            return Err(CoreError::UploadLimits(format!(
                "You can only upload pictures up to a total pixel count of {}.",
                self.max_pixels_per_image
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn uuid_v4_only() {
        assert!(validate_uuid("654dbda4-3e33-4e6e-8f14-1ed3a0f3a6a4").is_ok());
        assert!(validate_uuid("6ba7b810-9dad-11d1-80b4-00c04fd430c8").is_err());
        assert!(validate_uuid("nope").is_err());
    }

    #[test]
    fn secure_filename_strips_paths_and_symbols() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("i contain cool \u{fc}ml\u{e4}uts.txt"), "i_contain_cool_mluts.txt");
        assert_eq!(secure_filename("..."), "upload");
    }

    #[test]
    fn file_stem_keeps_hidden_names() {
        assert_eq!(file_stem("sketch.final.png"), "sketch.final");
        assert_eq!(file_stem("sketch"), "sketch");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[test]
    fn upload_limits() {
        let limits = UploadLimits {
            max_files: 2,
            max_pixels_per_image: 100,
        };
        assert!(limits.check_file_count(2).is_ok());
        assert_matches!(limits.check_file_count(3), Err(CoreError::UploadLimits(_)));
        assert_matches!(limits.check_file_count(0), Err(CoreError::Validation(_)));
        assert!(limits.check_dimensions(10, 10).is_ok());
        assert_matches!(limits.check_dimensions(10, 11), Err(CoreError::UploadLimits(_)));
    }
}
