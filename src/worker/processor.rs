// Post-processing applied by the image workers. The worker only cares about
// the `ImageProcessor` seam; `ThumbnailProcessor` is the stock implementation.

use crate::storage::ObjectKey;
use bytes::Bytes;
use image::{DynamicImage, ImageError, ImageFormat, error::LimitErrorKind};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// One output of a processor, stored by the worker under
/// `ObjectKey::derived(variant, extension)`.
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    pub variant: String,
    pub extension: &'static str,
    pub data: Bytes,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("cannot encode image: {0}")]
    Encode(String),

    #[error("insufficient resources: {0}")]
    Resources(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Whether retrying the same input may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Resources(_))
    }
}

impl From<ImageError> for ProcessError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::IoError(e) => Self::Io(e),
            ImageError::Limits(limit)
                if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) =>
            {
                Self::Resources(limit.to_string())
            }
            ImageError::Encoding(e) => Self::Encode(e.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// CPU-bound transformation run on the blocking pool.
pub trait ImageProcessor: Send + Sync {
    fn process(&self, key: &ObjectKey, source: &[u8]) -> Result<Vec<DerivedArtifact>, ProcessError>;
}

/// Produces one aspect-preserving thumbnail per configured bounding size.
#[derive(Debug, Clone)]
pub struct ThumbnailProcessor {
    sizes: Vec<u32>,
}

impl ThumbnailProcessor {
    pub fn new(sizes: Vec<u32>) -> Self {
        let mut sizes: Vec<u32> = sizes.into_iter().filter(|size| *size > 0).collect();
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.is_empty() {
            sizes.push(DEFAULT_THUMBNAIL_SIZE);
        }
        Self { sizes }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }
}

impl Default for ThumbnailProcessor {
    fn default() -> Self {
        Self::new(vec![DEFAULT_THUMBNAIL_SIZE])
    }
}

impl ImageProcessor for ThumbnailProcessor {
    fn process(&self, key: &ObjectKey, source: &[u8]) -> Result<Vec<DerivedArtifact>, ProcessError> {
        let image = image::load_from_memory(source)?;
        let (format, extension) = output_format(key.extension());
        debug!(
            key = %key,
            width = image.width(),
            height = image.height(),
            ?format,
            "Decoded source image"
        );

        self.sizes
            .iter()
            .map(|&size| {
                let thumbnail = image.thumbnail(size, size);
                Ok(DerivedArtifact {
                    variant: size.to_string(),
                    extension,
                    data: encode(thumbnail, format)?,
                })
            })
            .collect()
    }
}

// Keep the source format where we can encode it, PNG otherwise.
fn output_format(extension: Option<&str>) -> (ImageFormat, &'static str) {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("jpg" | "jpeg") => (ImageFormat::Jpeg, "jpg"),
        Some("webp") => (ImageFormat::WebP, "webp"),
        _ => (ImageFormat::Png, "png"),
    }
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Bytes, ProcessError> {
    // JPEG has no alpha channel and the WebP encoder only takes 8-bit RGB(A).
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ if image.color().has_alpha() => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };

    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format)?;
    Ok(Bytes::from(buffer.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_thumbnail_fits_bounding_box() {
        let processor = ThumbnailProcessor::new(vec![64]);
        let key = ObjectKey::parse("wide.png").unwrap();

        let artifacts = processor.process(&key, &png_bytes(400, 200)).unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].variant, "64");
        assert_eq!(artifacts[0].extension, "png");
        let thumb = image::load_from_memory(&artifacts[0].data).unwrap();
        assert_eq!(thumb.dimensions(), (64, 32));
    }

    #[test]
    fn test_one_artifact_per_size() {
        let processor = ThumbnailProcessor::new(vec![128, 32, 128, 0]);
        assert_eq!(processor.sizes(), &[32, 128]);

        let key = ObjectKey::parse("square.png").unwrap();
        let artifacts = processor.process(&key, &png_bytes(300, 300)).unwrap();
        let variants: Vec<&str> = artifacts.iter().map(|a| a.variant.as_str()).collect();
        assert_eq!(variants, vec!["32", "128"]);
    }

    #[test]
    fn test_jpeg_source_keeps_jpeg_output() {
        let processor = ThumbnailProcessor::default();
        let key = ObjectKey::parse("photo.JPEG").unwrap();

        let artifacts = processor.process(&key, &png_bytes(600, 400)).unwrap();

        assert_eq!(artifacts[0].extension, "jpg");
        assert_eq!(
            image::guess_format(&artifacts[0].data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_unknown_extension_falls_back_to_png() {
        let processor = ThumbnailProcessor::default();
        let key = ObjectKey::parse("scan.bmp").unwrap();

        let artifacts = processor.process(&key, &png_bytes(10, 10)).unwrap();
        assert_eq!(artifacts[0].extension, "png");
    }

    #[test]
    fn test_garbage_is_a_permanent_failure() {
        let processor = ThumbnailProcessor::default();
        let key = ObjectKey::parse("photo.jpg").unwrap();

        let err = processor.process(&key, b"definitely not an image").unwrap_err();
        assert!(matches!(err, ProcessError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = ProcessError::from(ImageError::IoError(std::io::Error::other("disk hiccup")));
        assert!(err.is_transient());
    }
}
