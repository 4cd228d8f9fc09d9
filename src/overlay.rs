//! Overlay preparation.
//!
//! The overlay is decoded and fitted to the canvas once per job. Every encode
//! task then receives the same [`PreparedOverlay`]; cloning it only bumps a
//! reference count, and nothing ever writes to the pixels.

use std::sync::Arc;

use image::RgbaImage;

use crate::configuration::ResizeFilter;
use crate::conversion::decode_still;
use crate::error::RenderError;
use crate::guard::ResourceGuard;
use crate::resize;

/// A canvas-sized overlay shared read-only by every encode task of a job.
#[derive(Debug, Clone)]
pub struct PreparedOverlay {
    pixels: Arc<RgbaImage>,
    alpha: f32,
}

impl PreparedOverlay {
    /// Decode `bytes` and fit it inside a `width × height` transparent canvas.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SourceDecode`] when the overlay cannot be
    /// decoded or exceeds the pixel ceiling.
    pub fn prepare(
        bytes: &[u8],
        width: u32,
        height: u32,
        alpha: f32,
        filter: ResizeFilter,
        guard: &ResourceGuard,
    ) -> Result<Self, RenderError> {
        let decoded = decode_still(bytes, guard).map_err(|error| match error {
            RenderError::SourceDecode(reason) => {
                RenderError::SourceDecode(format!("overlay: {reason}"))
            }
            other => RenderError::SourceDecode(format!("overlay: {other}")),
        })?;

        log::debug!(
            "Preparing {}x{} overlay for {}x{} canvas at alpha {:.2}",
            decoded.width(),
            decoded.height(),
            width,
            height,
            alpha
        );
        let fitted = resize::contain(&decoded, width, height, filter);
        drop(decoded);

        Ok(Self {
            pixels: Arc::new(fitted),
            alpha: alpha.clamp(0.0, 1.0),
        })
    }

    /// The fitted, transparently padded overlay.
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Opacity the overlay is composited at.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Composite the overlay onto `frame` in place.
    pub(crate) fn apply(&self, frame: &mut RgbaImage) -> Result<(), RenderError> {
        crate::composite::over_in_place(frame, &self.pixels, self.alpha)
    }
}
