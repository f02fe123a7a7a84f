// Variant generation
// Every accepted upload is decoded once and re-encoded into the closed
// variant set. Decoding and encoding rebuild the pixel buffer, which strips
// metadata and destroys polyglot payloads as a side effect.

use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

pub const DEFAULT_MAX_CONCURRENT: usize = 32;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;

const MIN_DIMENSION: u32 = 10;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Invalid image dimensions")]
    InvalidDimensions,

    #[error("Image is too small to process (minimum {0}x{0})")]
    ImageTooSmall(u32),

    #[error("Image processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid variant type: {0}")]
    InvalidVariantType(String),
}

/// The closed set of image variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Thumbnail,
    Small,
    Medium,
    Large,
    Original,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Thumbnail,
        Variant::Small,
        Variant::Medium,
        Variant::Large,
        Variant::Original,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Thumbnail => "thumbnail",
            Variant::Small => "small",
            Variant::Medium => "medium",
            Variant::Large => "large",
            Variant::Original => "original",
        }
    }

    /// Maximum output width. `None` means the variant is never resized.
    pub fn max_width(&self) -> Option<u32> {
        match self {
            Variant::Thumbnail => Some(160),
            Variant::Small => Some(320),
            Variant::Medium => Some(800),
            Variant::Large => Some(1600),
            Variant::Original => None,
        }
    }

    /// Encoder quality. The original is re-encoded near-losslessly; resized
    /// variants trade quality for size.
    pub fn quality(&self) -> f32 {
        match self {
            Variant::Thumbnail => 82.0,
            Variant::Small | Variant::Medium => 85.0,
            Variant::Large => 88.0,
            Variant::Original => 100.0,
        }
    }
}

impl FromStr for Variant {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(Variant::Thumbnail),
            "small" => Ok(Variant::Small),
            "medium" => Ok(Variant::Medium),
            "large" => Ok(Variant::Large),
            "original" => Ok(Variant::Original),
            other => Err(ProcessingError::InvalidVariantType(other.to_string())),
        }
    }
}

/// One encoded output of the processor.
#[derive(Debug, Clone)]
pub struct ProcessedVariant {
    pub variant: Variant,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_concurrent: usize,
    pub memory_limit_mb: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

pub struct ImageProcessor {
    semaphore: Arc<Semaphore>,
    memory_limit_bytes: u64,
}

impl ImageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            memory_limit_bytes: config.memory_limit_mb * 1024 * 1024,
        }
    }

    /// Generate the full variant set for an accepted upload.
    ///
    /// Waits on the concurrency semaphore first (this await respects
    /// cancellation); the native decode/encode then runs on the blocking
    /// pool and completes or fails as a unit.
    pub async fn process(&self, data: Bytes) -> Result<Vec<ProcessedVariant>, ProcessingError> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProcessingError::ProcessingFailed("processor shut down".into()))?;

        let memory_limit = self.memory_limit_bytes;
        tokio::task::spawn_blocking(move || generate_variants(&data, memory_limit))
            .await
            .map_err(|e| ProcessingError::ProcessingFailed(format!("worker panicked: {}", e)))?
    }
}

fn generate_variants(
    data: &[u8],
    memory_limit_bytes: u64,
) -> Result<Vec<ProcessedVariant>, ProcessingError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessingError::ProcessingFailed(e.to_string()))?;

    let format = reader.format().ok_or(ProcessingError::UnsupportedFormat)?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
    ) {
        return Err(ProcessingError::UnsupportedFormat);
    }

    let mut limits = Limits::default();
    limits.max_alloc = Some(memory_limit_bytes);
    let mut reader = reader;
    reader.limits(limits);

    // Animated GIF decodes to its first frame here; all variants derive
    // from that frame. Decoded pixels are treated as sRGB and outputs are
    // written untagged, so every variant lands in the same color space.
    let source = reader.decode().map_err(|e| match e {
        image::ImageError::Limits(_) => ProcessingError::InvalidDimensions,
        other => ProcessingError::ProcessingFailed(other.to_string()),
    })?;

    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(ProcessingError::InvalidDimensions);
    }
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ProcessingError::ImageTooSmall(MIN_DIMENSION));
    }

    let mut variants = Vec::with_capacity(Variant::ALL.len());
    for variant in Variant::ALL {
        variants.push(encode_variant(&source, variant, format)?);
    }

    debug!(
        width,
        height,
        variants = variants.len(),
        "generated variant set"
    );
    Ok(variants)
}

fn encode_variant(
    source: &DynamicImage,
    variant: Variant,
    source_format: ImageFormat,
) -> Result<ProcessedVariant, ProcessingError> {
    let resized;
    let img = match variant.max_width() {
        // Resize down only; an image narrower than the target passes
        // through at its own size.
        Some(max_width) if source.width() > max_width => {
            let target_height = ((source.height() as u64 * max_width as u64)
                / source.width() as u64)
                .max(1) as u32;
            resized = source.resize(max_width, target_height, image::imageops::FilterType::Lanczos3);
            &resized
        },
        _ => source,
    };

    let (data, format, content_type) = match variant {
        Variant::Original => encode_original(img, source_format)?,
        _ => (
            encode_webp(img, variant.quality()),
            "webp",
            "image/webp",
        ),
    };

    Ok(ProcessedVariant {
        variant,
        width: img.width(),
        height: img.height(),
        data,
        format,
        content_type,
    })
}

/// Re-encode the original through the decode/encode path in its source
/// format at near-lossless quality. The visual content is preserved; any
/// non-pixel payload is not.
fn encode_original(
    img: &DynamicImage,
    format: ImageFormat,
) -> Result<(Bytes, &'static str, &'static str), ProcessingError> {
    match format {
        ImageFormat::Jpeg => {
            let mut buf = Vec::new();
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 100);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| ProcessingError::ProcessingFailed(e.to_string()))?;
            Ok((Bytes::from(buf), "jpeg", "image/jpeg"))
        },
        ImageFormat::Png => {
            let mut buf = Cursor::new(Vec::new());
            img.write_to(&mut buf, ImageFormat::Png)
                .map_err(|e| ProcessingError::ProcessingFailed(e.to_string()))?;
            Ok((Bytes::from(buf.into_inner()), "png", "image/png"))
        },
        ImageFormat::Gif => {
            let mut buf = Cursor::new(Vec::new());
            img.write_to(&mut buf, ImageFormat::Gif)
                .map_err(|e| ProcessingError::ProcessingFailed(e.to_string()))?;
            Ok((Bytes::from(buf.into_inner()), "gif", "image/gif"))
        },
        ImageFormat::WebP => Ok((encode_webp(img, 100.0), "webp", "image/webp")),
        _ => Err(ProcessingError::UnsupportedFormat),
    }
}

fn encode_webp(img: &DynamicImage, quality: f32) -> Bytes {
    let rgba = img.to_rgba8();
    let encoded =
        webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height()).encode(quality);
    Bytes::copy_from_slice(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        Bytes::from(buf.into_inner())
    }

    fn processor() -> ImageProcessor {
        ImageProcessor::new(ProcessorConfig::default())
    }

    #[tokio::test]
    async fn test_full_variant_set_generated() {
        let variants = processor()
            .process(encoded(2000, 1500, ImageFormat::Jpeg))
            .await
            .unwrap();

        assert_eq!(variants.len(), 5);
        let names: Vec<&str> = variants.iter().map(|v| v.variant.as_str()).collect();
        assert_eq!(
            names,
            ["thumbnail", "small", "medium", "large", "original"]
        );
    }

    #[tokio::test]
    async fn test_variant_widths_capped_and_aspect_preserved() {
        let variants = processor()
            .process(encoded(2000, 1000, ImageFormat::Png))
            .await
            .unwrap();

        for v in &variants {
            if let Some(max_width) = v.variant.max_width() {
                assert!(v.width <= max_width, "{} too wide", v.variant.as_str());
                // 2:1 aspect within a pixel of rounding.
                let expected_height = v.width / 2;
                assert!(
                    (v.height as i64 - expected_height as i64).abs() <= 1,
                    "{} aspect drifted: {}x{}",
                    v.variant.as_str(),
                    v.width,
                    v.height
                );
            }
        }
    }

    #[tokio::test]
    async fn test_small_image_never_enlarged() {
        let variants = processor()
            .process(encoded(100, 80, ImageFormat::Png))
            .await
            .unwrap();

        for v in &variants {
            assert_eq!((v.width, v.height), (100, 80));
        }
    }

    #[tokio::test]
    async fn test_original_keeps_format_and_dimensions() {
        let variants = processor()
            .process(encoded(640, 480, ImageFormat::Jpeg))
            .await
            .unwrap();

        let original = variants
            .iter()
            .find(|v| v.variant == Variant::Original)
            .unwrap();
        assert_eq!(original.format, "jpeg");
        assert_eq!(original.content_type, "image/jpeg");
        assert_eq!((original.width, original.height), (640, 480));

        // Re-encoded output must itself decode cleanly.
        let decoded = image::load_from_memory(&original.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[tokio::test]
    async fn test_resized_variants_are_webp() {
        let variants = processor()
            .process(encoded(2000, 1500, ImageFormat::Jpeg))
            .await
            .unwrap();

        for v in variants.iter().filter(|v| v.variant != Variant::Original) {
            assert_eq!(v.format, "webp");
            assert_eq!(v.content_type, "image/webp");
            assert_eq!(sniffed(&v.data), Some("image/webp"));
        }
    }

    fn sniffed(data: &[u8]) -> Option<&'static str> {
        crate::imaging::validator::sniff_mime_type(data)
    }

    #[tokio::test]
    async fn test_tiny_image_rejected() {
        let result = processor().process(encoded(5, 5, ImageFormat::Png)).await;
        assert!(matches!(result, Err(ProcessingError::ImageTooSmall(10))));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let result = processor()
            .process(Bytes::from_static(b"definitely not an image, just text bytes"))
            .await;
        assert!(matches!(result, Err(ProcessingError::UnsupportedFormat)));
    }

    #[test]
    fn test_variant_parse_round_trip() {
        for v in Variant::ALL {
            assert_eq!(v.as_str().parse::<Variant>().unwrap(), v);
        }
        assert!(matches!(
            "gigantic".parse::<Variant>(),
            Err(ProcessingError::InvalidVariantType(_))
        ));
    }
}
