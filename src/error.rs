//! Error types for the `animcard` crate.
//!
//! This module defines [`RenderError`], the unified error type returned by all
//! fallible operations in the crate. Errors carry enough context to tell a
//! fatal, job-level failure apart from a single frame that could not be
//! processed.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

use crate::cache::CacheStage;
use crate::frame::{Frame, RenderOutput};
use crate::partition::WorkRange;

/// The unified error type for all `animcard` operations.
///
/// Every public method that can fail returns `Result<T, RenderError>`.
///
/// Only [`SourceDecode`](RenderError::SourceDecode),
/// [`WorkerFatal`](RenderError::WorkerFatal), [`CacheIo`](RenderError::CacheIo),
/// [`InvalidOptions`](RenderError::InvalidOptions) and
/// [`Cancelled`](RenderError::Cancelled) ever escape
/// [`render`](crate::render()). [`FrameProcessing`](RenderError::FrameProcessing)
/// is recovered inside the worker that raised it and shows up in
/// [`RenderStats::skipped`](crate::RenderStats) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RenderError {
    /// The source image could not be parsed, or it exceeds the pixel ceiling.
    #[error("Failed to decode source image: {0}")]
    SourceDecode(String),

    /// A single frame failed to decode, resize, composite, or encode.
    #[error("Failed to process frame {index} during {stage} stage: {reason}")]
    FrameProcessing {
        /// Stage the failure happened in.
        stage: CacheStage,
        /// Source frame index.
        index: u64,
        /// Underlying reason.
        reason: String,
    },

    /// A worker task failed as a whole rather than on one frame.
    ///
    /// `partial` holds the frames that completed before the job aborted.
    #[error("Worker for frames {range} failed: {reason}")]
    WorkerFatal {
        /// The range the failing worker was assigned.
        range: WorkRange,
        /// Underlying reason.
        reason: String,
        /// Frames that were already merged when the job aborted.
        partial: Box<RenderOutput>,
    },

    /// The cache directory, or one file inside it, is not accessible.
    #[error("Cache I/O error at {path}: {reason}")]
    CacheIo {
        /// Offending path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A render option is out of its valid range.
    #[error("Invalid render options: {0}")]
    InvalidOptions(String),

    /// A cache stage name did not match any known stage.
    #[error("Unknown cache stage: {0}")]
    UnknownStage(String),

    /// A resize filter name did not match any known filter.
    #[error("Unknown resize filter: {0}")]
    UnknownFilter(String),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// GIF reassembly failed.
    #[error("GIF encoding error: {0}")]
    GifEncode(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

impl RenderError {
    /// Frames that were produced before a fatal worker error aborted the job.
    ///
    /// Returns an empty slice for every other variant.
    pub fn partial_output(&self) -> &[Frame] {
        match self {
            RenderError::WorkerFatal { partial, .. } => &partial.frames,
            _ => &[],
        }
    }

    pub(crate) fn frame(stage: CacheStage, index: u64, reason: impl ToString) -> Self {
        RenderError::FrameProcessing {
            stage,
            index,
            reason: reason.to_string(),
        }
    }
}
