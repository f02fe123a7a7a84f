// Storage key derivation and validation
// Every object write funnels through derive_key -> validate_key, so a key that
// reaches a provider is guaranteed free of path traversal.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::storage::StorageError;

/// Extensions allowed for image objects. Anything else is rejected at the
/// key boundary regardless of what the processor produced.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

const MAX_DISPLAY_FILENAME_LEN: usize = 200;

lazy_static! {
    static ref KEY_REGEX: Regex = Regex::new(
        r"^images/[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}/[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}/[a-z]+\.(jpg|jpeg|png|gif|webp)$"
    )
    .unwrap();
}

/// Map a format hint (MIME type, bare extension, or anything else) to a
/// canonical extension. Unknown input defaults to `jpg`.
pub fn extension_for_format(format_hint: &str) -> &'static str {
    match format_hint.trim().to_lowercase().as_str() {
        "image/jpeg" | "jpeg" => "jpeg",
        "image/jpg" | "jpg" => "jpg",
        "image/png" | "png" => "png",
        "image/gif" | "gif" => "gif",
        "image/webp" | "webp" => "webp",
        _ => "jpg",
    }
}

/// Derive the canonical storage key for one variant of an image:
/// `images/{owner}/{image}/{variant}.{ext}`.
pub fn derive_key(owner_id: Uuid, image_id: Uuid, variant: &str, format_hint: &str) -> String {
    let ext = extension_for_format(format_hint);
    format!(
        "images/{}/{}/{}.{}",
        owner_id,
        image_id,
        variant.to_lowercase(),
        ext
    )
}

/// Validate a storage key. Only the canonical image-key shape is accepted;
/// traversal sequences, absolute prefixes and NUL bytes are rejected before
/// the pattern is even consulted.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }

    if key.contains('\0') {
        return Err(StorageError::PathTraversal);
    }

    if key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::PathTraversal);
    }

    if key.contains("..") {
        return Err(StorageError::PathTraversal);
    }

    // The key must equal its own path-clean form: forward slashes only, no
    // empty, "." or ".." segments.
    if key.contains('\\') {
        return Err(StorageError::PathTraversal);
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::PathTraversal);
    }

    if !KEY_REGEX.is_match(key) {
        return Err(StorageError::InvalidKey(format!(
            "key does not match canonical image key format: {}",
            key
        )));
    }

    Ok(())
}

/// Sanitize a client-supplied filename for display purposes. Display
/// filenames are never used as storage keys; this cleanup is deliberately
/// more permissive than `validate_key`.
pub fn sanitize_filename(name: &str) -> String {
    // Strip any path components, whichever separator the client used.
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .replace(' ', "_");

    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    // A name consisting only of dropped characters (or dots) is useless.
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return "unnamed.jpg".to_string();
    }

    if cleaned.len() <= MAX_DISPLAY_FILENAME_LEN {
        return cleaned;
    }

    // Truncate while preserving the extension.
    match cleaned.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = &cleaned[dot..];
            let keep = MAX_DISPLAY_FILENAME_LEN.saturating_sub(ext.len());
            format!("{}{}", &cleaned[..keep], ext)
        },
        _ => cleaned[..MAX_DISPLAY_FILENAME_LEN].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_derive_produces_valid_keys() {
        let (owner, image) = ids();
        for variant in ["thumbnail", "small", "medium", "large", "original"] {
            for hint in ["image/jpeg", "image/png", "webp", "gif", "garbage", ""] {
                let key = derive_key(owner, image, variant, hint);
                assert!(
                    validate_key(&key).is_ok(),
                    "derived key failed validation: {}",
                    key
                );
            }
        }
    }

    #[test]
    fn test_unknown_format_defaults_to_jpg() {
        let (owner, image) = ids();
        let key = derive_key(owner, image, "thumbnail", "application/octet-stream");
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let (owner, image) = ids();
        let good = derive_key(owner, image, "original", "jpg");

        let bad = [
            format!("../{}", good),
            format!("/{}", good),
            format!("\\{}", good),
            good.replace("original", "../original"),
            format!("{}\0", good),
            "images/../../etc/passwd".to_string(),
            format!("images//{}/{}/original.jpg", owner, image),
            format!("images/{}/{}/./original.jpg", owner, image),
        ];

        for key in &bad {
            assert!(
                matches!(validate_key(key), Err(StorageError::PathTraversal)),
                "expected traversal rejection for {:?}",
                key
            );
        }
    }

    #[test]
    fn test_non_canonical_keys_rejected() {
        let (owner, image) = ids();

        let bad = [
            format!("images/{}/{}/original.exe", owner, image),
            format!("images/{}/{}/Original.jpg", owner, image),
            format!("avatars/{}/{}/original.jpg", owner, image),
            format!("images/{}/original.jpg", owner),
            format!("images/not-a-uuid/{}/original.jpg", image),
        ];

        for key in &bad {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey(_))),
                "expected invalid-key rejection for {:?}",
                key
            );
        }
    }

    #[test]
    fn test_sanitize_filename_strips_paths_and_spaces() {
        assert_eq!(
            sanitize_filename("../../etc/my photo.jpg"),
            "my_photo.jpg"
        );
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\vacation pic.png"),
            "vacation_pic.png"
        );
        assert_eq!(sanitize_filename("café.png"), "caf.png");
    }

    #[test]
    fn test_sanitize_filename_fallback() {
        assert_eq!(sanitize_filename(""), "unnamed.jpg");
        assert_eq!(sanitize_filename("¡¢£"), "unnamed.jpg");
        assert_eq!(sanitize_filename("..."), "unnamed.jpg");
    }

    #[test]
    fn test_sanitize_filename_truncates_preserving_extension() {
        let long = format!("{}.png", "a".repeat(300));
        let cleaned = sanitize_filename(&long);
        assert!(cleaned.len() <= 200);
        assert!(cleaned.ends_with(".png"));
    }
}
