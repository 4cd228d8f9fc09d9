//! Source image decoding.
//!
//! The pipeline talks to codecs only through [`SourceDecoder`], which has two
//! jobs: [`probe`](SourceDecoder::probe) a source for its canvas size and
//! per-frame delays, and hand a worker a fresh [`frames`](SourceDecoder::frames)
//! iterator over full-canvas RGBA frames. Each worker calls `frames` for
//! itself, so no decoder state is shared between workers.
//!
//! [`CodecDecoder`] is the default implementation, backed by the `image`
//! crate for pixels and the `gif` crate for reading GIF frame headers.
//! Animated GIF, APNG and animated WebP are decoded frame by frame; any other
//! format `image` understands is treated as a single still frame.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ImageDecoder, ImageFormat, ImageReader, Limits, RgbaImage};

use crate::error::RenderError;
use crate::guard::ResourceGuard;

/// A lazily decoded sequence of full-canvas frames.
///
/// An `Err` item is a single frame that could not be decoded; callers may
/// keep pulling to reach the frames after it.
pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<RgbaImage, RenderError>> + 'a>;

/// What a probe learned about a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Canvas width of the source animation.
    pub width: u32,
    /// Canvas height of the source animation.
    pub height: u32,
    /// Detected container format.
    pub format: ImageFormat,
    /// Display delay of every frame in milliseconds; `0` means unspecified.
    pub frame_delays_ms: Vec<u32>,
}

impl SourceInfo {
    /// Number of frames in the source.
    pub fn frame_count(&self) -> u64 {
        self.frame_delays_ms.len() as u64
    }

    /// Delay of frame `index`, or `fallback_ms` when unspecified or unknown.
    pub fn delay_ms(&self, index: u64, fallback_ms: u32) -> u32 {
        match self.frame_delays_ms.get(index as usize) {
            Some(&delay) if delay > 0 => delay,
            _ => fallback_ms,
        }
    }

    /// Whether the source has more than one frame.
    pub fn is_animated(&self) -> bool {
        self.frame_delays_ms.len() > 1
    }
}

/// Decoder for multi-frame source images.
///
/// Implementations must be thread-safe: one instance is shared by every
/// worker of a job, and each worker opens its own frame iterator.
pub trait SourceDecoder: Send + Sync {
    /// Read the source's dimensions and frame delays.
    ///
    /// Must enforce `guard`'s pixel ceiling before allocating any frame
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SourceDecode`] when the source is unreadable,
    /// has no frames, or is too large.
    fn probe(&self, source: &[u8], guard: &ResourceGuard) -> Result<SourceInfo, RenderError>;

    /// Start decoding frames from the beginning of the source.
    ///
    /// # Errors
    ///
    /// Returns an error when no decoder can be constructed at all. Errors for
    /// individual frames are yielded by the iterator instead.
    fn frames<'a>(
        &self,
        source: &'a [u8],
        guard: &ResourceGuard,
    ) -> Result<FrameIter<'a>, RenderError>;
}

/// The default [`SourceDecoder`], built on the `image` and `gif` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecDecoder;

impl SourceDecoder for CodecDecoder {
    fn probe(&self, source: &[u8], guard: &ResourceGuard) -> Result<SourceInfo, RenderError> {
        let format = image::guess_format(source).map_err(source_error)?;
        let (width, height) = ImageReader::with_format(Cursor::new(source), format)
            .into_dimensions()
            .map_err(source_error)?;
        guard.check_dimensions(width, height)?;

        let frame_delays_ms = match format {
            ImageFormat::Gif => gif_frame_delays(source)?,
            ImageFormat::Png => {
                let decoder =
                    PngDecoder::with_limits(Cursor::new(source), guard.limits()).map_err(source_error)?;
                if decoder.is_apng().map_err(source_error)? {
                    apng_frame_delays(source)?
                } else {
                    vec![0]
                }
            }
            ImageFormat::WebP => {
                let mut decoder = WebPDecoder::new(Cursor::new(source)).map_err(source_error)?;
                decoder.set_limits(guard.limits()).map_err(source_error)?;
                if decoder.has_animation() {
                    webp_frame_delays(source)?
                } else {
                    vec![0]
                }
            }
            _ => vec![0],
        };

        if frame_delays_ms.is_empty() {
            return Err(RenderError::SourceDecode(
                "source contains no frames".to_string(),
            ));
        }

        log::debug!(
            "Probed {:?} source: {}x{}, {} frame(s)",
            format,
            width,
            height,
            frame_delays_ms.len()
        );
        Ok(SourceInfo {
            width,
            height,
            format,
            frame_delays_ms,
        })
    }

    fn frames<'a>(
        &self,
        source: &'a [u8],
        guard: &ResourceGuard,
    ) -> Result<FrameIter<'a>, RenderError> {
        let format = image::guess_format(source).map_err(source_error)?;
        let limits = guard.limits();

        match format {
            ImageFormat::Gif => {
                let mut decoder = GifDecoder::new(Cursor::new(source)).map_err(source_error)?;
                decoder.set_limits(limits).map_err(source_error)?;
                Ok(animation_frames(decoder))
            }
            ImageFormat::Png => {
                let decoder =
                    PngDecoder::with_limits(Cursor::new(source), limits.clone()).map_err(source_error)?;
                if decoder.is_apng().map_err(source_error)? {
                    Ok(animation_frames(decoder.apng().map_err(source_error)?))
                } else {
                    Ok(still_frame(source, format, limits))
                }
            }
            ImageFormat::WebP => {
                let mut decoder = WebPDecoder::new(Cursor::new(source)).map_err(source_error)?;
                decoder.set_limits(limits.clone()).map_err(source_error)?;
                if decoder.has_animation() {
                    Ok(animation_frames(decoder))
                } else {
                    Ok(still_frame(source, format, limits))
                }
            }
            _ => Ok(still_frame(source, format, limits)),
        }
    }
}

/// Read GIF frame delays from frame headers without decoding into pixel
/// buffers.
fn gif_frame_delays(source: &[u8]) -> Result<Vec<u32>, RenderError> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options
        .read_info(Cursor::new(source))
        .map_err(source_error)?;

    let mut delays = Vec::new();
    while let Some(frame) = decoder.next_frame_info().map_err(source_error)? {
        // GIF delays are in hundredths of a second.
        delays.push(u32::from(frame.delay) * 10);
    }
    Ok(delays)
}

/// Read APNG frame delays from `fcTL` chunk headers. Image data chunks are
/// stepped over without being inflated.
fn apng_frame_delays(source: &[u8]) -> Result<Vec<u32>, RenderError> {
    const SIGNATURE_LEN: usize = 8;

    let mut delays = Vec::new();
    let mut offset = SIGNATURE_LEN;
    while let Some(header) = source.get(offset..offset + 8) {
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = &header[4..8];
        let body = chunk_body(source, offset + 8, length).ok_or_else(|| truncated("PNG", kind))?;

        match kind {
            b"fcTL" => {
                let (Some(numerator), Some(denominator)) = (be_u16(body, 20), be_u16(body, 22))
                else {
                    return Err(truncated("PNG", kind));
                };
                delays.push(apng_delay_ms(numerator, denominator));
            }
            b"IEND" => break,
            _ => {}
        }
        // Body plus CRC.
        offset += 8 + length + 4;
    }
    Ok(delays)
}

/// `fcTL` delays are a fraction of a second; a zero denominator means 1/100.
fn apng_delay_ms(numerator: u16, denominator: u16) -> u32 {
    let denominator = match denominator {
        0 => 100,
        other => u32::from(other),
    };
    u32::from(numerator) * 1000 / denominator
}

/// Read animated WebP frame durations from `ANMF` chunk headers without
/// decoding any frame bitstream.
fn webp_frame_delays(source: &[u8]) -> Result<Vec<u32>, RenderError> {
    if source.get(0..4) != Some(&b"RIFF"[..]) || source.get(8..12) != Some(&b"WEBP"[..]) {
        return Err(RenderError::SourceDecode(
            "not a RIFF WebP container".to_string(),
        ));
    }

    let mut delays = Vec::new();
    let mut offset = 12;
    while let Some(header) = source.get(offset..offset + 8) {
        let kind = &header[0..4];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let body = chunk_body(source, offset + 8, size).ok_or_else(|| truncated("WebP", kind))?;

        if kind == b"ANMF" {
            let duration = body
                .get(12..15)
                .ok_or_else(|| truncated("WebP", kind))?;
            delays.push(u32::from_le_bytes([duration[0], duration[1], duration[2], 0]));
        }
        // RIFF chunks are padded to an even size.
        offset += 8 + size + (size & 1);
    }
    Ok(delays)
}

fn chunk_body(source: &[u8], start: usize, length: usize) -> Option<&[u8]> {
    source.get(start..)?.get(..length)
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|field| u16::from_be_bytes([field[0], field[1]]))
}

fn truncated(container: &str, kind: &[u8]) -> RenderError {
    RenderError::SourceDecode(format!(
        "truncated {container} chunk {}",
        String::from_utf8_lossy(kind)
    ))
}

fn animation_frames<'a, D: AnimationDecoder<'a>>(decoder: D) -> FrameIter<'a> {
    Box::new(
        decoder
            .into_frames()
            .map(|frame| frame.map(image::Frame::into_buffer).map_err(RenderError::from)),
    )
}

fn still_frame(source: &[u8], format: ImageFormat, limits: Limits) -> FrameIter<'_> {
    Box::new(std::iter::once_with(move || -> Result<RgbaImage, RenderError> {
        let mut reader = ImageReader::with_format(Cursor::new(source), format);
        reader.limits(limits);
        Ok(reader.decode()?.into_rgba8())
    }))
}

fn source_error(error: impl ToString) -> RenderError {
    RenderError::SourceDecode(error.to_string())
}
