//! Object key utilities.
//!
//! Object keys are `/`-separated and case-preserving. Only the final segment
//! of a key can carry an extension, so `"a.b/noext"` has none.

use crate::types::TargetFormat;

/// Default source image extensions considered for conversion.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif"];

/// Byte offset of the `.` that starts the key's extension, if any.
fn extension_dot(key: &str) -> Option<usize> {
    let name_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = &key[name_start..];
    match name.rfind('.') {
        // A leading dot names a hidden file, not an extension.
        Some(0) | None => None,
        Some(i) => Some(name_start + i),
    }
}

/// Get the extension of a key without the dot, if it has one.
///
/// # Examples
///
/// ```
/// use stillforged_common::keys::key_extension;
///
/// assert_eq!(key_extension("a/b/photo.JPG"), Some("JPG"));
/// assert_eq!(key_extension("a.b/noext"), None);
/// ```
pub fn key_extension(key: &str) -> Option<&str> {
    extension_dot(key).map(|dot| &key[dot + 1..])
}

/// Derive the key a converted object is stored under.
///
/// The source extension is replaced by the target format's extension, or
/// the target extension is appended when the key has none.
///
/// # Examples
///
/// ```
/// use stillforged_common::keys::target_key;
/// use stillforged_common::TargetFormat;
///
/// assert_eq!(target_key("a/b/photo.JPG", TargetFormat::Webp), "a/b/photo.webp");
/// assert_eq!(target_key("noext", TargetFormat::Webp), "noext.webp");
/// ```
pub fn target_key(source_key: &str, format: TargetFormat) -> String {
    let stem = match extension_dot(source_key) {
        Some(dot) => &source_key[..dot],
        None => source_key,
    };
    format!("{}.{}", stem, format.extension())
}

/// Check whether a key's extension is one of `extensions` (case-insensitive).
pub fn has_extension<S: AsRef<str>>(key: &str, extensions: &[S]) -> bool {
    key_extension(key)
        .map(|ext| {
            extensions
                .iter()
                .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Get the default list of source image extensions.
#[must_use]
pub fn image_extensions() -> &'static [&'static str] {
    IMAGE_EXTENSIONS
}
