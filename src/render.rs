//! Job orchestration.
//!
//! [`FrameRenderer`] owns a [`RenderJob`] from start to finish:
//!
//! 1. validate options, probe the source, open the cache;
//! 2. partition the sampled frame space into [`WorkRange`]s;
//! 3. dispatch one extraction task per range and wait for all of them;
//! 4. hand each range's extracted frames to one encode task and wait again;
//! 5. merge the replies into a single ascending sequence.
//!
//! Any fatal task failure aborts the rest of the job. Per-frame failures are
//! absorbed by the tasks and only show up in [`RenderStats::skipped`].

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::cache::FrameCache;
use crate::configuration::RenderOptions;
use crate::error::RenderError;
use crate::frame::{Frame, RenderOutput, RenderStats};
use crate::guard::MemoryTracker;
use crate::overlay::PreparedOverlay;
use crate::partition::{WorkRange, partition_strided, sampled_count};
use crate::progress::{OperationType, ProgressTracker};
use crate::source::{CodecDecoder, SourceDecoder, SourceInfo};
use crate::worker::{
    self, EncodeTask, ExtractTask, TaskControl, TaskFailure, TaskReply, TaskReport, TaskRequest,
};

/// One rendering request: a source image and the cache directory it owns.
///
/// The cache directory should be unique per distinct job. Reusing it for
/// the same source and options resumes from whatever was cached before.
#[derive(Clone)]
pub struct RenderJob {
    source: Arc<[u8]>,
    cache_dir: PathBuf,
}

impl RenderJob {
    /// Create a job caching into `cache_dir`.
    pub fn new(source: impl Into<Arc<[u8]>>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Create a job with a fresh, uniquely named cache directory under
    /// `scratch_root`.
    pub fn in_scratch_dir(source: impl Into<Arc<[u8]>>, scratch_root: impl AsRef<Path>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let name = format!("job-{}-{nanos:x}", std::process::id());
        Self::new(source, scratch_root.as_ref().join(name))
    }

    /// The source image bytes.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Where this job's cache lives.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl Debug for RenderJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RenderJob")
            .field("source_len", &self.source.len())
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

/// Runs render jobs with a fixed set of options.
///
/// # Example
///
/// ```no_run
/// use animcard::{FrameRenderer, RenderError, RenderJob, RenderOptions};
///
/// let source = std::fs::read("avatar.gif")?;
/// let renderer = FrameRenderer::new(
///     RenderOptions::new().with_canvas(256, 256).with_frame_skip(2),
/// );
/// let output = renderer.render(&RenderJob::new(source, "/tmp/avatar-cache"))?;
/// println!("{} frames, {} skipped", output.frames.len(), output.stats.skipped);
/// # Ok::<(), RenderError>(())
/// ```
#[derive(Clone)]
pub struct FrameRenderer {
    options: RenderOptions,
    decoder: Arc<dyn SourceDecoder>,
}

impl FrameRenderer {
    /// Create a renderer using the built-in [`CodecDecoder`].
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            decoder: Arc::new(CodecDecoder),
        }
    }

    /// Replace the source decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn SourceDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The options every job is rendered with.
    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Probe `source` under this renderer's pixel ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SourceDecode`] for unreadable or oversized
    /// sources.
    pub fn probe(&self, source: &[u8]) -> Result<SourceInfo, RenderError> {
        self.decoder.probe(source, &self.options.guard())
    }

    /// Render `job` to an ordered sequence of encoded frames.
    ///
    /// # Errors
    ///
    /// - [`RenderError::InvalidOptions`] before any work starts.
    /// - [`RenderError::SourceDecode`] if the source cannot be probed; no
    ///   task is dispatched.
    /// - [`RenderError::CacheIo`] if the cache directory is unusable.
    /// - [`RenderError::WorkerFatal`] if a task fails as a whole. Frames
    ///   already merged are available through
    ///   [`RenderError::partial_output`].
    /// - [`RenderError::Cancelled`] if the options' cancellation token fires.
    pub fn render(&self, job: &RenderJob) -> Result<RenderOutput, RenderError> {
        let options = &self.options;
        options.validate()?;
        if options.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let started = Instant::now();
        let mut memory = MemoryTracker::new();
        memory.sample("job start");

        let guard = options.guard();
        let info = Arc::new(self.decoder.probe(job.source(), &guard)?);
        let cache = FrameCache::open(job.cache_dir())?;

        let stride = options.frame_skip;
        let ranges = partition_strided(info.frame_count(), stride, options.workers);
        let requested = sampled_count(info.frame_count(), stride);
        let mut stats = RenderStats {
            requested,
            workers: ranges.len(),
            ..RenderStats::default()
        };

        if ranges.is_empty() {
            log::info!(
                "Frame skip {stride} exceeds the source's {} frame(s); nothing to render",
                info.frame_count()
            );
            stats.elapsed = started.elapsed();
            return Ok(RenderOutput {
                frames: Vec::new(),
                stats,
            });
        }

        let (width, height) = options.canvas();
        let overlay = options
            .overlay
            .as_deref()
            .map(|bytes| {
                PreparedOverlay::prepare(
                    bytes,
                    width,
                    height,
                    options.overlay_alpha,
                    options.resize_filter,
                    &guard,
                )
            })
            .transpose()?;

        log::info!(
            "Rendering {requested} of {} frame(s) at {width}x{height} across {} worker(s)",
            info.frame_count(),
            ranges.len()
        );

        let pool = worker::build_pool(ranges.len())?;
        let control = TaskControl::new(options.cancellation.clone());
        let source: Arc<[u8]> = Arc::clone(&job.source);

        // Extraction
        let requests = ranges
            .iter()
            .map(|&range| {
                TaskRequest::Extract(ExtractTask {
                    source: Arc::clone(&source),
                    info: Arc::clone(&info),
                    decoder: Arc::clone(&self.decoder),
                    range,
                    stride,
                    canvas: (width, height),
                    filter: options.resize_filter,
                    fallback_delay_ms: options.fallback_delay_ms,
                    guard,
                    cache: cache.clone(),
                })
            })
            .collect();
        let replies = worker::dispatch(&pool, requests, &control);
        let mut tracker = ProgressTracker::new(
            Arc::clone(&options.progress),
            OperationType::FrameExtraction,
            Some(requested),
            options.batch_size,
        );
        let extracted = collect_stage(replies, &control, &mut tracker);
        memory.sample("after extraction");

        let reports = match extracted {
            StageOutcome::Completed(reports) => reports,
            StageOutcome::Cancelled => return Err(RenderError::Cancelled),
            StageOutcome::Fatal {
                range,
                reason,
                completed: _,
            } => {
                stats.elapsed = started.elapsed();
                stats.peak_rss_kb = memory.peak_rss_kb();
                return Err(RenderError::WorkerFatal {
                    range,
                    reason,
                    partial: Box::new(RenderOutput {
                        frames: Vec::new(),
                        stats,
                    }),
                });
            }
        };
        for report in &reports {
            stats.extract_cache_hits += report.cache_hits;
            stats.frames_decoded += report.processed;
            stats.cache_write_failures += report.cache_write_failures;
        }
        let extracted_frames = merge_frames(reports);

        // Encoding
        let encode_total = extracted_frames.len() as u64;
        let requests = split_by_range(extracted_frames, &ranges)
            .into_iter()
            .map(|(range, frames)| {
                TaskRequest::Encode(EncodeTask {
                    range,
                    frames,
                    overlay: overlay.clone(),
                    guard,
                    cache: cache.clone(),
                })
            })
            .collect();
        let replies = worker::dispatch(&pool, requests, &control);
        let mut tracker = ProgressTracker::new(
            Arc::clone(&options.progress),
            OperationType::FrameEncoding,
            Some(encode_total),
            options.batch_size,
        );
        let encoded = collect_stage(replies, &control, &mut tracker);
        drop(overlay);
        memory.sample("after encoding");

        let reports = match encoded {
            StageOutcome::Completed(reports) => reports,
            StageOutcome::Cancelled => return Err(RenderError::Cancelled),
            StageOutcome::Fatal {
                range,
                reason,
                completed,
            } => {
                let frames = merge_frames(completed);
                stats.produced = frames.len() as u64;
                stats.elapsed = started.elapsed();
                stats.peak_rss_kb = memory.peak_rss_kb();
                return Err(RenderError::WorkerFatal {
                    range,
                    reason,
                    partial: Box::new(RenderOutput { frames, stats }),
                });
            }
        };
        for report in &reports {
            stats.encode_cache_hits += report.cache_hits;
            stats.frames_encoded += report.processed;
            stats.cache_write_failures += report.cache_write_failures;
        }
        let frames = merge_frames(reports);
        log_gaps(&frames, &ranges, stride);

        stats.produced = frames.len() as u64;
        stats.skipped = requested.saturating_sub(stats.produced);
        stats.elapsed = started.elapsed();
        stats.peak_rss_kb = memory.peak_rss_kb();

        log::info!(
            "Rendered {}/{} frame(s) ({} skipped, {} decoded, {} encoded) in {:?}",
            stats.produced,
            stats.requested,
            stats.skipped,
            stats.frames_decoded,
            stats.frames_encoded,
            stats.elapsed
        );
        Ok(RenderOutput { frames, stats })
    }
}

impl Debug for FrameRenderer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FrameRenderer")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Render `source` with `options`, caching into `cache_dir`.
///
/// Shorthand for [`FrameRenderer::render`] with the default decoder.
///
/// # Errors
///
/// See [`FrameRenderer::render`].
pub fn render(
    source: &[u8],
    options: &RenderOptions,
    cache_dir: impl AsRef<Path>,
) -> Result<RenderOutput, RenderError> {
    let job = RenderJob::new(source, cache_dir.as_ref());
    FrameRenderer::new(options.clone()).render(&job)
}

enum StageOutcome {
    Completed(Vec<TaskReport>),
    Cancelled,
    Fatal {
        range: WorkRange,
        reason: String,
        completed: Vec<TaskReport>,
    },
}

/// Wait for every task of a stage to reply.
///
/// The first fatal failure aborts the remaining tasks, but this still waits
/// for all of them so no task outlives its stage.
fn collect_stage(
    replies: Receiver<TaskReply>,
    control: &TaskControl,
    tracker: &mut ProgressTracker,
) -> StageOutcome {
    let mut completed = Vec::new();
    let mut fatal: Option<(WorkRange, String)> = None;
    let mut cancelled = false;

    for (range, result) in replies {
        match result {
            Ok(report) => {
                log::debug!("Worker for frames {} replied", report.range);
                let last = report.frames.last().map(|frame| frame.index);
                tracker.advance_by(report.handled(), last);
                completed.push(report);
            }
            Err(TaskFailure::Fatal(reason)) => {
                log::error!("Worker for frames {range} failed: {reason}");
                if fatal.is_none() {
                    control.abort();
                    fatal = Some((range, reason));
                }
            }
            Err(TaskFailure::Cancelled) => cancelled = true,
            Err(TaskFailure::Aborted) => {
                log::debug!("Worker for frames {range} stopped after job abort");
            }
        }
    }

    if let Some((range, reason)) = fatal {
        return StageOutcome::Fatal {
            range,
            reason,
            completed,
        };
    }
    if cancelled {
        log::info!("Render cancelled");
        return StageOutcome::Cancelled;
    }
    tracker.finish();
    StageOutcome::Completed(completed)
}

/// Flatten per-task frames into ascending index order, dropping duplicates.
fn merge_frames(reports: Vec<TaskReport>) -> Vec<Frame> {
    let mut frames: Vec<Frame> = reports
        .into_iter()
        .flat_map(|report| report.frames)
        .collect();
    frames.sort_by_key(|frame| frame.index);

    let before = frames.len();
    frames.dedup_by_key(|frame| frame.index);
    if frames.len() != before {
        log::warn!(
            "Dropped {} duplicate frame(s) while merging worker results",
            before - frames.len()
        );
    }
    frames
}

/// Give each range the frames whose indices it owns.
fn split_by_range(frames: Vec<Frame>, ranges: &[WorkRange]) -> Vec<(WorkRange, Vec<Frame>)> {
    let mut remaining = frames.into_iter().peekable();
    ranges
        .iter()
        .map(|&range| {
            let mut owned = Vec::new();
            while let Some(frame) = remaining.next_if(|frame| frame.index < range.end) {
                owned.push(frame);
            }
            (range, owned)
        })
        .collect()
}

fn log_gaps(frames: &[Frame], ranges: &[WorkRange], stride: u64) {
    for index in ranges.iter().flat_map(|range| range.sampled(stride)) {
        if frames
            .binary_search_by_key(&index, |frame| frame.index)
            .is_err()
        {
            log::warn!("Frame {index} is missing from every worker result; dropping it");
        }
    }
}
