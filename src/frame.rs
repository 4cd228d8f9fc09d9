//! Frames and render results.
//!
//! A [`Frame`] is one re-encoded still from the source animation, tagged with
//! its source index and display delay. [`RenderOutput`] is what
//! [`render`](crate::render()) hands back: the frames in ascending index order
//! plus [`RenderStats`].

use std::time::Duration;

/// One frame of the rendered sequence.
///
/// Identity is [`index`](Frame::index), the position of the frame in the
/// source animation. `buffer` holds PNG-encoded pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Index of the frame in the source animation.
    pub index: u64,
    /// PNG-encoded frame data.
    pub buffer: Vec<u8>,
    /// How long the frame is displayed, in milliseconds.
    pub delay_ms: u32,
}

/// Aggregate counters for one render job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames the job asked for after applying the frame stride.
    pub requested: u64,
    /// Frames present in the output.
    pub produced: u64,
    /// Requested frames missing from the output because they failed.
    pub skipped: u64,
    /// Extraction results served from the cache.
    pub extract_cache_hits: u64,
    /// Encode results served from the cache.
    pub encode_cache_hits: u64,
    /// Frames that went through the decode and resize path.
    pub frames_decoded: u64,
    /// Frames that went through the composite and compress path.
    pub frames_encoded: u64,
    /// Cache writes that failed; those frames were kept in memory only.
    pub cache_write_failures: u64,
    /// Number of worker slots used per stage.
    pub workers: usize,
    /// Wall-clock time for the whole job.
    pub elapsed: Duration,
    /// Peak resident set size seen during the job, when the platform reports it.
    pub peak_rss_kb: Option<u64>,
}

/// The result of a render job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    /// Rendered frames, strictly ascending by index.
    pub frames: Vec<Frame>,
    /// Counters collected while rendering.
    pub stats: RenderStats,
}

impl RenderOutput {
    /// Total display time of the sequence.
    pub fn duration(&self) -> Duration {
        let total: u64 = self.frames.iter().map(|frame| frame.delay_ms as u64).sum();
        Duration::from_millis(total)
    }

    /// Source indices of the rendered frames, in output order.
    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|frame| frame.index).collect()
    }
}
