//! Render configuration.
//!
//! [`RenderOptions`] is a builder that carries canvas size, frame stride,
//! overlay settings, worker count, memory limits, progress callbacks and
//! cancellation tokens into [`render`](crate::render()) without
//! polluting its signature.
//!
//! # Example
//!
//! ```no_run
//! use animcard::{CancellationToken, RenderOptions, ResizeFilter};
//!
//! let overlay = std::fs::read("watermark.png").unwrap();
//! let token = CancellationToken::new();
//! let options = RenderOptions::new()
//!     .with_canvas(480, 270)
//!     .with_frame_skip(2)
//!     .with_overlay(overlay, 0.6)
//!     .with_workers(4)
//!     .with_resize_filter(ResizeFilter::Triangle)
//!     .with_cancellation(token.clone());
//! ```

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

use image::imageops::FilterType;

use crate::error::RenderError;
use crate::guard::{DEFAULT_MAX_PIXELS, ResourceGuard};
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Delay used for frames whose source does not specify one.
pub const DEFAULT_FRAME_DELAY_MS: u32 = 40;

/// Resampling filter used when fitting frames and overlays to the canvas.
///
/// Resolved once from its name, so an unknown filter is rejected up front
/// rather than when the first frame is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    /// Nearest-neighbour sampling.
    Nearest,
    /// Linear (triangle) filter.
    Triangle,
    /// Cubic Catmull-Rom filter.
    CatmullRom,
    /// Gaussian filter.
    Gaussian,
    /// Lanczos with window 3. This is the default.
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    /// Every filter, in order of increasing cost.
    pub const ALL: [ResizeFilter; 5] = [
        ResizeFilter::Nearest,
        ResizeFilter::Triangle,
        ResizeFilter::CatmullRom,
        ResizeFilter::Gaussian,
        ResizeFilter::Lanczos3,
    ];

    /// Canonical name accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            ResizeFilter::Nearest => "nearest",
            ResizeFilter::Triangle => "triangle",
            ResizeFilter::CatmullRom => "catmull-rom",
            ResizeFilter::Gaussian => "gaussian",
            ResizeFilter::Lanczos3 => "lanczos3",
        }
    }

    pub(crate) fn to_filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl Display for ResizeFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizeFilter {
    type Err = RenderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResizeFilter::Nearest),
            "triangle" | "linear" => Ok(ResizeFilter::Triangle),
            "catmull-rom" | "catmullrom" | "cubic" => Ok(ResizeFilter::CatmullRom),
            "gaussian" => Ok(ResizeFilter::Gaussian),
            "lanczos3" | "lanczos" => Ok(ResizeFilter::Lanczos3),
            _ => Err(RenderError::UnknownFilter(value.to_string())),
        }
    }
}

/// Configuration for a render job.
///
/// All fields have sensible defaults; see [`RenderOptions::new`].
#[derive(Clone)]
pub struct RenderOptions {
    pub(crate) canvas_width: u32,
    pub(crate) canvas_height: u32,
    pub(crate) frame_skip: u64,
    pub(crate) overlay: Option<Arc<[u8]>>,
    pub(crate) overlay_alpha: f32,
    pub(crate) workers: usize,
    pub(crate) max_pixels: u64,
    pub(crate) fallback_delay_ms: u32,
    pub(crate) resize_filter: ResizeFilter,
    /// Progress callback. Defaults to a no-op.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// Cancellation token. `None` means never cancelled.
    pub(crate) cancellation: Option<CancellationToken>,
    /// How often to fire the progress callback (every N frames).
    pub(crate) batch_size: u64,
}

impl Debug for RenderOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RenderOptions")
            .field("canvas_width", &self.canvas_width)
            .field("canvas_height", &self.canvas_height)
            .field("frame_skip", &self.frame_skip)
            .field("has_overlay", &self.overlay.is_some())
            .field("overlay_alpha", &self.overlay_alpha)
            .field("workers", &self.workers)
            .field("max_pixels", &self.max_pixels)
            .field("fallback_delay_ms", &self.fallback_delay_ms)
            .field("resize_filter", &self.resize_filter)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderOptions {
    /// Create options with default settings.
    ///
    /// Defaults: 512×512 canvas, every frame, no overlay, one worker per
    /// available CPU, 100-megapixel ceiling, 40 ms fallback delay, Lanczos3
    /// resampling, no progress callback, no cancellation, batch size 1.
    pub fn new() -> Self {
        Self {
            canvas_width: 512,
            canvas_height: 512,
            frame_skip: 1,
            overlay: None,
            overlay_alpha: 1.0,
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            max_pixels: DEFAULT_MAX_PIXELS,
            fallback_delay_ms: DEFAULT_FRAME_DELAY_MS,
            resize_filter: ResizeFilter::default(),
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
        }
    }

    /// Set the canvas every frame is fitted to.
    #[must_use]
    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.canvas_width = width;
        self.canvas_height = height;
        self
    }

    /// Sample every `frame_skip`-th source frame. `1` keeps every frame.
    #[must_use]
    pub fn with_frame_skip(mut self, frame_skip: u64) -> Self {
        self.frame_skip = frame_skip;
        self
    }

    /// Composite `overlay` onto every frame at `alpha` opacity.
    ///
    /// `alpha` is clamped into `[0, 1]`.
    #[must_use]
    pub fn with_overlay(mut self, overlay: impl Into<Arc<[u8]>>, alpha: f32) -> Self {
        self.overlay = Some(overlay.into());
        self.overlay_alpha = alpha.clamp(0.0, 1.0);
        self
    }

    /// Number of parallel worker slots per stage.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Ceiling on decodable pixels per image.
    #[must_use]
    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Delay applied to frames whose source delay is zero or missing.
    #[must_use]
    pub fn with_fallback_delay(mut self, delay_ms: u32) -> Self {
        self.fallback_delay_ms = delay_ms;
        self
    }

    /// Resampling filter for frames and overlay.
    #[must_use]
    pub fn with_resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.resize_filter = filter;
        self
    }

    /// Attach a progress callback.
    ///
    /// The callback is invoked every [`batch_size`](RenderOptions::with_batch_size)
    /// frames in each stage.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, workers stop at the next frame and the
    /// job returns [`RenderError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires.
    ///
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Canvas size as `(width, height)`.
    pub fn canvas(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// Frame stride.
    pub fn frame_skip(&self) -> u64 {
        self.frame_skip
    }

    /// Overlay opacity.
    pub fn overlay_alpha(&self) -> f32 {
        self.overlay_alpha
    }

    /// Worker slots per stage.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Check every setting against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidOptions`] naming the first offending
    /// setting.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(RenderError::InvalidOptions(format!(
                "canvas must be non-empty, got {}x{}",
                self.canvas_width, self.canvas_height
            )));
        }
        if self.frame_skip == 0 {
            return Err(RenderError::InvalidOptions(
                "frame skip must be at least 1".to_string(),
            ));
        }
        if !self.overlay_alpha.is_finite() {
            return Err(RenderError::InvalidOptions(
                "overlay alpha must be a finite number".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(RenderError::InvalidOptions(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.max_pixels == 0 {
            return Err(RenderError::InvalidOptions(
                "pixel ceiling must be at least 1".to_string(),
            ));
        }
        if self.fallback_delay_ms == 0 {
            return Err(RenderError::InvalidOptions(
                "fallback delay must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn guard(&self) -> ResourceGuard {
        ResourceGuard::new(self.max_pixels)
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
