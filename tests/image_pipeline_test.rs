// Image intake pipeline
// Exercises validator -> processor -> storage together over a temporary
// filesystem root, checking the variant contract end to end.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use uuid::Uuid;

use lumina_backend::imaging::processor::{ImageProcessor, ProcessorConfig, Variant};
use lumina_backend::imaging::validator::{
    ImageValidator, ScanOutcome, ValidationError, ValidatorConfig,
};
use lumina_backend::storage::local::LocalStorageProvider;
use lumina_backend::storage::{derive_key, PutOptions, StorageOrchestrator, StorageProvider};

fn encoded(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 251) as u8, (y * 13 % 251) as u8, 99])
    }));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    Bytes::from(buf.into_inner())
}

#[tokio::test]
async fn test_valid_jpeg_produces_complete_variant_set() {
    let validator = ImageValidator::new(ValidatorConfig::default(), None);
    let processor = ImageProcessor::new(ProcessorConfig::default());

    let data = encoded(4000, 3000, ImageFormat::Jpeg);
    let validated = validator.validate(&data, "camera photo.jpg").await.unwrap();
    assert_eq!(validated.mime_type, "image/jpeg");
    assert_eq!((validated.width, validated.height), (4000, 3000));
    assert_eq!(validated.scan, ScanOutcome::Skipped);

    let variants = processor.process(data).await.unwrap();

    // Exactly the closed variant set, in declaration order.
    let names: Vec<&str> = variants.iter().map(|v| v.variant.as_str()).collect();
    assert_eq!(names, ["thumbnail", "small", "medium", "large", "original"]);

    // Width caps and 4:3 aspect within a pixel.
    for v in &variants {
        if let Some(cap) = v.variant.max_width() {
            assert!(v.width <= cap);
        }
        let expected_height = (v.width as f64 * 3000.0 / 4000.0).round() as i64;
        assert!((v.height as i64 - expected_height).abs() <= 1);
    }

    // Original untouched dimensionally, same family of format.
    let original = variants.last().unwrap();
    assert_eq!(original.variant, Variant::Original);
    assert_eq!((original.width, original.height), (4000, 3000));
    assert_eq!(original.format, "jpeg");
}

#[tokio::test]
async fn test_variants_round_trip_through_storage() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn StorageProvider> =
        Arc::new(LocalStorageProvider::new(dir.path()).await.unwrap());
    let storage = StorageOrchestrator::new(provider, None, false);

    let processor = ImageProcessor::new(ProcessorConfig::default());
    let variants = processor
        .process(encoded(1200, 900, ImageFormat::Png))
        .await
        .unwrap();

    let owner = Uuid::new_v4();
    let image = Uuid::new_v4();

    for v in &variants {
        let key = derive_key(owner, image, v.variant.as_str(), v.format);
        storage
            .put_bytes(&key, v.data.clone(), PutOptions::for_variant(v.content_type))
            .await
            .unwrap();

        let read_back = storage.get_bytes(&key).await.unwrap();
        assert_eq!(read_back.len(), v.data.len());

        let decoded = image::load_from_memory(&read_back).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (v.width, v.height));
    }
}

#[tokio::test]
async fn test_png_masquerading_as_jpeg_detected_as_png() {
    // Type detection reads bytes, not the filename extension.
    let validator = ImageValidator::new(ValidatorConfig::default(), None);
    let png_bytes = encoded(100, 100, ImageFormat::Png);

    let validated = validator.validate(&png_bytes, "totally-a.jpg").await.unwrap();
    assert_eq!(validated.mime_type, "image/png");
}

#[tokio::test]
async fn test_size_and_pixel_gates() {
    let validator = ImageValidator::new(
        ValidatorConfig {
            max_file_size: 1024 * 1024,
            max_width: 6000,
            max_height: 6000,
            max_pixels: 1_000_000,
        },
        None,
    );

    // Axes fit, product does not: the decompression-bomb case.
    let bomb = encoded(2000, 2000, ImageFormat::Png);
    match validator.validate(&bomb, "bomb.png").await {
        Err(ValidationError::ImageTooManyPixels(pixels, limit)) => {
            assert_eq!(pixels, 4_000_000);
            assert_eq!(limit, 1_000_000);
        },
        other => panic!("expected pixel-count rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_trailing_payload_does_not_survive_reencode() {
    // A polyglot carries its payload outside the pixel data. Re-encoding
    // rebuilds the file from decoded pixels, so either the upload is
    // rejected outright or the payload is gone from every output.
    let payload = b"<script>alert('polyglot')</script>";
    let mut data = encoded(200, 200, ImageFormat::Jpeg).to_vec();
    data.extend_from_slice(payload);

    let processor = ImageProcessor::new(ProcessorConfig::default());
    match processor.process(Bytes::from(data)).await {
        Ok(variants) => {
            for v in variants {
                let haystack = v.data.as_ref();
                let found = haystack
                    .windows(payload.len())
                    .any(|window| window == payload);
                assert!(!found, "payload survived in {}", v.variant.as_str());
            }
        },
        Err(_) => {
            // Rejecting the mangled file is an equally acceptable outcome.
        },
    }
}

#[tokio::test]
async fn test_concurrent_processing_respects_semaphore() {
    // A single-permit processor must still complete all jobs.
    let processor = Arc::new(ImageProcessor::new(ProcessorConfig {
        max_concurrent: 1,
        memory_limit_mb: 256,
    }));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let processor = processor.clone();
        let data = encoded(600, 400, ImageFormat::Png);
        handles.push(tokio::spawn(async move { processor.process(data).await }));
    }

    for handle in handles {
        let variants = handle.await.unwrap().unwrap();
        assert_eq!(variants.len(), 5);
    }
}
