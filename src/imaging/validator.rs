// Upload validation pipeline
// Gates run in a fixed order and abort on the first failure: size, MIME
// sniff, signature verification, dimensions, pixel count, malware scan,
// display-filename cleanup.

use std::io::Cursor;
use std::sync::Arc;

use image::ImageReader;
use thiserror::Error;
use tracing::warn;

use crate::imaging::scanner::{MalwareScanner, ScanVerdict};
use crate::storage::sanitize_filename;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("File size {0} exceeds the maximum of {1} bytes")]
    FileTooLarge(u64, u64),

    #[error("File is not a supported image type")]
    InvalidMimeType,

    #[error("Image dimension {0} exceeds the maximum of {1} pixels")]
    ImageTooLarge(u32, u32),

    #[error("Image pixel count {0} exceeds the maximum of {1}")]
    ImageTooManyPixels(u64, u64),

    #[error("Malware detected: {0}")]
    MalwareDetected(String),

    #[error("Malware scan failed: {0}")]
    ScanFailed(String),
}

/// MIME types accepted at the intake boundary.
pub const ACCEPTED_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// What the malware gate concluded. Disabled scanning is recorded as
/// `Skipped`, never as clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    Skipped,
}

/// The validator's output, consumed by the upload orchestrator.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub scan: ScanOutcome,
    pub display_filename: String,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_file_size: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

pub struct ImageValidator {
    config: ValidatorConfig,
    scanner: Option<Arc<dyn MalwareScanner>>,
}

impl ImageValidator {
    pub fn new(config: ValidatorConfig, scanner: Option<Arc<dyn MalwareScanner>>) -> Self {
        Self { config, scanner }
    }

    /// Run every gate against a raw upload.
    pub async fn validate(
        &self,
        data: &[u8],
        original_filename: &str,
    ) -> Result<ValidatedUpload, ValidationError> {
        // Gate 1: size.
        let size = data.len() as u64;
        if size > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge(
                size,
                self.config.max_file_size,
            ));
        }

        // Gate 2: sniff the type from leading bytes; the client-declared
        // extension and content type are never consulted.
        let mime_type = sniff_mime_type(data).ok_or(ValidationError::InvalidMimeType)?;

        // Gate 3: the full signature must agree with the sniffed type.
        if !verify_signature(data, mime_type) {
            return Err(ValidationError::InvalidMimeType);
        }

        // Gate 4: per-axis dimension limits, read from the header without a
        // full decode.
        let (width, height) = probe_dimensions(data)?;
        if width > self.config.max_width {
            return Err(ValidationError::ImageTooLarge(width, self.config.max_width));
        }
        if height > self.config.max_height {
            return Err(ValidationError::ImageTooLarge(
                height,
                self.config.max_height,
            ));
        }

        // Gate 5: pixel-count cap. Both axes can pass gate 4 while the
        // product would still exhaust memory on decode.
        let pixels = width as u64 * height as u64;
        if pixels > self.config.max_pixels {
            return Err(ValidationError::ImageTooManyPixels(
                pixels,
                self.config.max_pixels,
            ));
        }

        // Gate 6: malware scan.
        let scan = match &self.scanner {
            Some(scanner) => match scanner.scan(data).await {
                Ok(ScanVerdict::Clean) => ScanOutcome::Clean,
                Ok(ScanVerdict::Infected(name)) => {
                    warn!(signature = %name, "rejected infected upload");
                    return Err(ValidationError::MalwareDetected(name));
                },
                Err(e) => return Err(ValidationError::ScanFailed(e.to_string())),
            },
            None => ScanOutcome::Skipped,
        };

        Ok(ValidatedUpload {
            mime_type,
            width,
            height,
            size,
            scan,
            display_filename: sanitize_filename(original_filename),
        })
    }
}

/// Detect an accepted image type from leading bytes. Returns the canonical
/// MIME type, or None for anything unrecognized.
pub fn sniff_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 {
        return None;
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// Verify the signature in depth for the sniffed type.
fn verify_signature(data: &[u8], mime_type: &str) -> bool {
    match mime_type {
        // SOI marker followed by a valid marker byte.
        "image/jpeg" => data.len() > 3 && data[3] >= 0xC0,
        "image/png" => data.len() > 24,
        "image/gif" => data.len() > 13,
        "image/webp" => {
            // RIFF length field may not claim more than the file holds
            // (one trailing pad byte is legal).
            let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
            declared.saturating_add(8) <= data.len().saturating_add(1)
        },
        _ => false,
    }
}

fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), ValidationError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|_| ValidationError::InvalidMimeType)?;
    reader
        .into_dimensions()
        .map_err(|_| ValidationError::InvalidMimeType)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};

    use crate::imaging::scanner::ScanError;

    fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 30, 200]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    struct FixedScanner(ScanVerdict);

    #[async_trait]
    impl MalwareScanner for FixedScanner {
        async fn scan(&self, _data: &[u8]) -> Result<ScanVerdict, ScanError> {
            Ok(self.0.clone())
        }
    }

    fn validator(scanner: Option<Arc<dyn MalwareScanner>>) -> ImageValidator {
        ImageValidator::new(ValidatorConfig::default(), scanner)
    }

    #[tokio::test]
    async fn test_valid_png_passes_all_gates() {
        let data = encoded_image(64, 48, ImageFormat::Png);
        let result = validator(None).validate(&data, "photo.png").await.unwrap();

        assert_eq!(result.mime_type, "image/png");
        assert_eq!((result.width, result.height), (64, 48));
        assert_eq!(result.scan, ScanOutcome::Skipped);
        assert_eq!(result.display_filename, "photo.png");
    }

    #[tokio::test]
    async fn test_oversized_file_rejected() {
        let config = ValidatorConfig {
            max_file_size: 128,
            ..ValidatorConfig::default()
        };
        let validator = ImageValidator::new(config, None);
        let data = encoded_image(256, 256, ImageFormat::Png);

        assert!(matches!(
            validator.validate(&data, "big.png").await,
            Err(ValidationError::FileTooLarge(_, 128))
        ));
    }

    #[tokio::test]
    async fn test_non_image_rejected() {
        let result = validator(None)
            .validate(b"#!/bin/sh\necho pwned\n please pad this out", "x.jpg")
            .await;
        assert!(matches!(result, Err(ValidationError::InvalidMimeType)));
    }

    #[tokio::test]
    async fn test_dimension_gate() {
        let config = ValidatorConfig {
            max_width: 100,
            max_height: 100,
            ..ValidatorConfig::default()
        };
        let validator = ImageValidator::new(config, None);
        let data = encoded_image(150, 50, ImageFormat::Png);

        assert!(matches!(
            validator.validate(&data, "wide.png").await,
            Err(ValidationError::ImageTooLarge(150, 100))
        ));
    }

    #[tokio::test]
    async fn test_pixel_count_gate_fires_when_axes_pass() {
        let config = ValidatorConfig {
            max_width: 500,
            max_height: 500,
            max_pixels: 10_000,
            ..ValidatorConfig::default()
        };
        let validator = ImageValidator::new(config, None);
        // 200 x 200 fits both axes but exceeds 10k pixels.
        let data = encoded_image(200, 200, ImageFormat::Png);

        assert!(matches!(
            validator.validate(&data, "bomb.png").await,
            Err(ValidationError::ImageTooManyPixels(40_000, 10_000))
        ));
    }

    #[tokio::test]
    async fn test_infected_upload_rejected() {
        let scanner: Arc<dyn MalwareScanner> =
            Arc::new(FixedScanner(ScanVerdict::Infected("Eicar-Test".into())));
        let data = encoded_image(32, 32, ImageFormat::Png);

        let result = validator(Some(scanner)).validate(&data, "x.png").await;
        assert!(matches!(result, Err(ValidationError::MalwareDetected(name)) if name == "Eicar-Test"));
    }

    #[tokio::test]
    async fn test_clean_scan_recorded() {
        let scanner: Arc<dyn MalwareScanner> = Arc::new(FixedScanner(ScanVerdict::Clean));
        let data = encoded_image(32, 32, ImageFormat::Png);

        let result = validator(Some(scanner))
            .validate(&data, "x.png")
            .await
            .unwrap();
        assert_eq!(result.scan, ScanOutcome::Clean);
    }

    #[test]
    fn test_sniff_rejects_extension_spoofing() {
        // PNG bytes are PNG regardless of what the filename claims.
        let data = encoded_image(16, 16, ImageFormat::Png);
        assert_eq!(sniff_mime_type(&data), Some("image/png"));

        let jpeg = encoded_image(16, 16, ImageFormat::Jpeg);
        assert_eq!(sniff_mime_type(&jpeg), Some("image/jpeg"));
    }
}
