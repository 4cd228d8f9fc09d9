//! Alpha compositing.
//!
//! Frames and overlays are straight (non-premultiplied) RGBA8, which is what
//! the `image` decoders produce. [`over`] is the Porter-Duff "source over"
//! operator with an extra opacity applied to the source.

use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageError, Rgba, RgbaImage};

use crate::error::RenderError;

/// Blend `src` over `dst` at `opacity` (clamped into `[0, 1]`).
pub fn over(dst: Rgba<u8>, src: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let opacity = opacity.clamp(0.0, 1.0);
    let source_alpha = f32::from(src[3]) / 255.0 * opacity;
    if source_alpha <= 0.0 {
        return dst;
    }

    let dest_alpha = f32::from(dst[3]) / 255.0;
    let dest_weight = dest_alpha * (1.0 - source_alpha);
    let out_alpha = source_alpha + dest_weight;
    if out_alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for channel in 0..3 {
        let value = (f32::from(src[channel]) * source_alpha + f32::from(dst[channel]) * dest_weight)
            / out_alpha;
        out[channel] = to_u8(value);
    }
    out[3] = to_u8(out_alpha * 255.0);
    Rgba(out)
}

/// Blend `overlay` over every pixel of `frame` in place.
///
/// # Errors
///
/// Returns a dimension-mismatch [`ImageError`] when the two images differ in
/// size.
pub fn over_in_place(frame: &mut RgbaImage, overlay: &RgbaImage, opacity: f32) -> Result<(), RenderError> {
    if frame.dimensions() != overlay.dimensions() {
        return Err(ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
        .into());
    }
    if opacity <= 0.0 {
        return Ok(());
    }

    for (dst, src) in frame.pixels_mut().zip(overlay.pixels()) {
        if src[3] != 0 {
            *dst = over(*dst, *src, opacity);
        }
    }
    Ok(())
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
