// Storage key safety
// Every derived key must validate; every malformed or hostile key must be
// rejected before it can reach a provider.

use uuid::Uuid;

use lumina_backend::storage::{derive_key, key::extension_for_format, validate_key, StorageError};

#[test]
fn test_every_derived_key_validates() {
    for _ in 0..50 {
        let owner = Uuid::new_v4();
        let image = Uuid::new_v4();
        for variant in ["thumbnail", "small", "medium", "large", "original"] {
            for hint in [
                "image/jpeg",
                "image/png",
                "image/gif",
                "image/webp",
                "jpg",
                "jpeg",
                "png",
                "gif",
                "webp",
                "application/pdf",
                "",
                "JPEG",
            ] {
                let key = derive_key(owner, image, variant, hint);
                assert!(
                    validate_key(&key).is_ok(),
                    "derived key rejected: {} (hint {:?})",
                    key,
                    hint
                );
            }
        }
    }
}

#[test]
fn test_traversal_shapes_rejected() {
    let hostile = [
        "../etc/passwd",
        "/etc/passwd",
        "\\windows\\system32",
        "images/../../../etc/passwd",
        "images/a/../b/original.jpg",
        "images/abc\0def/x/original.jpg",
        "images//x/original.jpg",
        "images/./x/original.jpg",
    ];

    for key in hostile {
        assert!(
            matches!(validate_key(key), Err(StorageError::PathTraversal)),
            "expected traversal rejection for {:?}",
            key
        );
    }
}

#[test]
fn test_non_canonical_shapes_rejected() {
    let owner = Uuid::new_v4();
    let image = Uuid::new_v4();

    let bad = [
        // Wrong prefix.
        format!("uploads/{}/{}/original.jpg", owner, image),
        // Missing a segment.
        format!("images/{}/original.jpg", owner),
        // Extra segment.
        format!("images/{}/{}/extra/original.jpg", owner, image),
        // Disallowed extension.
        format!("images/{}/{}/original.svg", owner, image),
        format!("images/{}/{}/original.jpg.exe", owner, image),
        // Uppercase variant.
        format!("images/{}/{}/Original.jpg", owner, image),
        // Uppercase UUID.
        format!(
            "images/{}/{}/original.jpg",
            owner.to_string().to_uppercase(),
            image
        ),
        // Numeric variant segment.
        format!("images/{}/{}/123.jpg", owner, image),
    ];

    for key in &bad {
        assert!(
            validate_key(key).is_err(),
            "expected rejection for {:?}",
            key
        );
    }
}

#[test]
fn test_extension_mapping() {
    assert_eq!(extension_for_format("image/jpeg"), "jpeg");
    assert_eq!(extension_for_format("image/webp"), "webp");
    assert_eq!(extension_for_format("PNG"), "png");
    assert_eq!(extension_for_format("gif"), "gif");
    assert_eq!(extension_for_format("application/x-msdownload"), "jpg");
    assert_eq!(extension_for_format(""), "jpg");
}
