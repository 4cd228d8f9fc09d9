//! Internal PNG helpers.
//!
//! Both cache stages store PNG. Extraction writes with fast compression since
//! its files are read back once by the encode stage; the encode stage writes
//! the delivery format with maximum compression.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbaImage};

use crate::error::RenderError;
use crate::guard::ResourceGuard;

/// PNG compression effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PngEffort {
    /// Intermediate artifacts.
    Fast,
    /// Delivery artifacts.
    Best,
}

/// Encode an RGBA buffer as PNG.
pub(crate) fn encode_png(image: &RgbaImage, effort: PngEffort) -> Result<Vec<u8>, RenderError> {
    let (compression, filter) = match effort {
        PngEffort::Fast => (CompressionType::Fast, PngFilterType::Sub),
        PngEffort::Best => (CompressionType::Best, PngFilterType::Adaptive),
    };

    let mut buffer = Vec::new();
    PngEncoder::new_with_quality(&mut buffer, compression, filter).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}

/// Decode a PNG artifact to RGBA under the guard's limits.
pub(crate) fn decode_png(bytes: &[u8], guard: &ResourceGuard) -> Result<RgbaImage, RenderError> {
    let mut reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png);
    reader.limits(guard.limits());
    Ok(reader.decode()?.into_rgba8())
}

/// Decode any supported still image to RGBA, checking its header dimensions
/// against the guard before allocating.
pub(crate) fn decode_still(bytes: &[u8], guard: &ResourceGuard) -> Result<RgbaImage, RenderError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| RenderError::SourceDecode("unrecognised image format".to_string()))?;

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    guard.check_dimensions(width, height)?;

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(guard.limits());
    Ok(reader.decode()?.into_rgba8())
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn png_round_trip_is_lossless() {
        let mut image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 1, Rgba([200, 100, 50, 128]));

        for effort in [PngEffort::Fast, PngEffort::Best] {
            let bytes = encode_png(&image, effort).unwrap();
            let decoded = decode_png(&bytes, &ResourceGuard::default()).unwrap();
            assert_eq!(decoded, image);
        }
    }

    #[test]
    fn decode_still_enforces_ceiling() {
        let image = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let bytes = encode_png(&image, PngEffort::Fast).unwrap();

        let result = decode_still(&bytes, &ResourceGuard::new(100));
        assert!(matches!(result, Err(RenderError::SourceDecode(_))));
        assert!(decode_still(&bytes, &ResourceGuard::default()).is_ok());
    }
}
