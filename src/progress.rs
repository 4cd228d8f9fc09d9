//! Stage progress and cooperative cancellation.
//!
//! A render reports each stage separately: [`OperationType::FrameExtraction`]
//! while frames are decoded and fitted, then [`OperationType::FrameEncoding`]
//! once every extraction task has replied. [`gif::save_gif`](crate::save_gif)
//! can report [`OperationType::GifExport`] as well.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use animcard::{OperationType, ProgressCallback, ProgressInfo, RenderError, RenderOptions};
//!
//! struct StageLog;
//!
//! impl ProgressCallback for StageLog {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         let stage = match info.operation {
//!             OperationType::FrameExtraction => "extract",
//!             OperationType::FrameEncoding => "encode",
//!             _ => "export",
//!         };
//!         eprintln!("{stage}: {}/{:?}", info.current, info.total);
//!     }
//! }
//!
//! let source = std::fs::read("avatar.gif")?;
//! let options = RenderOptions::new().with_progress(Arc::new(StageLog));
//! animcard::render(&source, &options, "/tmp/animcard-job")?;
//! # Ok::<(), RenderError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// Which part of the pipeline a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Decoding source frames and fitting them to the canvas.
    FrameExtraction,
    /// Compositing and recompressing extracted frames.
    FrameEncoding,
    /// Reassembling rendered frames into an animated GIF.
    GifExport,
}

/// A snapshot of render progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at a cadence controlled
/// by [`RenderOptions::with_batch_size`](crate::RenderOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage being reported.
    pub operation: OperationType,
    /// How many frames have been handled so far in this stage.
    pub current: u64,
    /// Total frames expected in this stage, if known ahead of time.
    pub total: Option<u64>,
    /// `current / total` as a percentage; `None` without a total.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the stage started.
    pub elapsed: Duration,
    /// Linear extrapolation of `elapsed` over the frames still to go.
    pub estimated_remaining: Option<Duration>,
    /// The last frame index accounted for, if any.
    pub current_frame: Option<u64>,
}

/// Trait for receiving progress updates during a render.
///
/// Implementations must be [`Send`] and [`Sync`] because a job may be driven
/// from a background thread.
///
/// Progress callbacks are **infallible**: they observe but cannot halt
/// the operation. Use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals during a render.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Callback installed when [`RenderOptions`](crate::RenderOptions) has none.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared stop flag for a render job.
///
/// Every clone observes the same flag. Workers look at it between frames,
/// so a job stops within one frame's worth of work per worker after
/// [`cancel`](CancellationToken::cancel) is called.
///
/// # Example
///
/// ```
/// use animcard::CancellationToken;
///
/// let token = CancellationToken::new();
/// let for_ui = token.clone();
/// assert!(!token.is_cancelled());
///
/// for_ui.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every job holding a clone of this token to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](CancellationToken::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Turns per-stage frame counts into throttled [`ProgressInfo`] reports.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    handled: u64,
    unreported: u64,
    batch_size: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            handled: 0,
            unreported: 0,
            batch_size: batch_size.max(1),
            started: Instant::now(),
        }
    }

    /// Account for `count` more frames.
    ///
    /// Worker replies cover a whole range at once, so a single call may cross
    /// several batch boundaries; it still produces at most one report.
    pub(crate) fn advance_by(&mut self, count: u64, last_frame: Option<u64>) {
        if count == 0 {
            return;
        }
        self.handled += count;
        self.unreported += count;
        if self.unreported >= self.batch_size {
            self.unreported = 0;
            self.emit(last_frame);
        }
    }

    /// Report the stage as finished, regardless of batching.
    pub(crate) fn finish(&mut self) {
        self.unreported = 0;
        self.emit(None);
    }

    fn emit(&self, last_frame: Option<u64>) {
        let elapsed = self.started.elapsed();
        let total = self.total;

        let percentage = total
            .filter(|&total| total > 0)
            .map(|total| self.handled as f32 / total as f32 * 100.0);
        let estimated_remaining = match total {
            Some(total) if self.handled > 0 => {
                let left = total.saturating_sub(self.handled) as f64;
                Some(elapsed.mul_f64(left / self.handled as f64))
            }
            _ => None,
        };

        self.callback.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.handled,
            total,
            percentage,
            elapsed,
            estimated_remaining,
            current_frame: last_frame,
        });
    }
}
