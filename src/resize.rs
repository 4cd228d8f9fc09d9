//! Fitting images to the canvas.
//!
//! Frames use [`cover`]: crop the largest centred region with the canvas's
//! aspect ratio, then scale it to the canvas. Overlays use [`contain`]: scale
//! until the image fits, then pad with transparent pixels.
//!
//! Neither ever builds an intermediate larger than its input or the canvas.

use image::{Rgba, RgbaImage, imageops};

use crate::configuration::ResizeFilter;

/// Scale `image` to fill `width × height`, cropping centred overflow.
pub fn cover(image: &RgbaImage, width: u32, height: u32, filter: ResizeFilter) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }

    let (x, y, crop_width, crop_height) = cover_crop(image.dimensions(), (width, height));
    let cropped = imageops::crop_imm(image, x, y, crop_width, crop_height).to_image();
    if cropped.dimensions() == (width, height) {
        return cropped;
    }
    imageops::resize(&cropped, width, height, filter.to_filter_type())
}

/// Scale `image` to fit inside `width × height`, centred on a transparent
/// canvas of exactly that size.
pub fn contain(image: &RgbaImage, width: u32, height: u32, filter: ResizeFilter) -> RgbaImage {
    let (scaled_width, scaled_height) = contain_dimensions(image.dimensions(), (width, height));
    let scaled = if (scaled_width, scaled_height) == image.dimensions() {
        image.clone()
    } else {
        imageops::resize(image, scaled_width, scaled_height, filter.to_filter_type())
    };

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let x = i64::from((width - scaled_width) / 2);
    let y = i64::from((height - scaled_height) / 2);
    imageops::replace(&mut canvas, &scaled, x, y);
    canvas
}

/// Largest centred `(x, y, width, height)` region of `source` with the
/// target's aspect ratio.
fn cover_crop(source: (u32, u32), target: (u32, u32)) -> (u32, u32, u32, u32) {
    let (source_width, source_height) = (u64::from(source.0), u64::from(source.1));
    let (target_width, target_height) = (u64::from(target.0), u64::from(target.1));

    let (crop_width, crop_height) = if source_width * target_height > source_height * target_width {
        // Wider than the canvas: keep the full height.
        let width = (source_height * target_width + target_height / 2) / target_height;
        (width.clamp(1, source_width), source_height)
    } else {
        let height = (source_width * target_height + target_width / 2) / target_width;
        (source_width, height.clamp(1, source_height))
    };

    // Both crop sides are bounded by the source's, so they fit in u32.
    let crop_width = crop_width as u32;
    let crop_height = crop_height as u32;
    (
        (source.0 - crop_width) / 2,
        (source.1 - crop_height) / 2,
        crop_width,
        crop_height,
    )
}

/// Largest size with the source's aspect ratio that fits inside the target.
fn contain_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let scale = f64::min(
        f64::from(target.0) / f64::from(source.0),
        f64::from(target.1) / f64::from(source.1),
    );
    (
        scaled(source.0, scale).clamp(1, target.0),
        scaled(source.1, scale).clamp(1, target.1),
    )
}

fn scaled(length: u32, scale: f64) -> u32 {
    (f64::from(length) * scale).round() as u32
}
