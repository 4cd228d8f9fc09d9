//! One-shot task dispatch onto the worker pool.
//!
//! Every task is a self-contained [`TaskRequest`]: it owns (or holds a
//! read-only `Arc` to) all the data it needs. The task runs on a pool thread,
//! sends exactly one reply down a channel, and is gone. Workers keep no state
//! between tasks and never touch each other's data; the only things they
//! share are immutable inputs and disjoint cache files.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cache::{CacheStage, FrameCache};
use crate::configuration::ResizeFilter;
use crate::error::RenderError;
use crate::frame::Frame;
use crate::guard::ResourceGuard;
use crate::overlay::PreparedOverlay;
use crate::partition::WorkRange;
use crate::progress::CancellationToken;
use crate::source::{SourceDecoder, SourceInfo};
use crate::{encode, extract};

/// Payload for one extraction task.
pub(crate) struct ExtractTask {
    pub(crate) source: Arc<[u8]>,
    pub(crate) info: Arc<SourceInfo>,
    pub(crate) decoder: Arc<dyn SourceDecoder>,
    pub(crate) range: WorkRange,
    pub(crate) stride: u64,
    pub(crate) canvas: (u32, u32),
    pub(crate) filter: ResizeFilter,
    pub(crate) fallback_delay_ms: u32,
    pub(crate) guard: ResourceGuard,
    pub(crate) cache: FrameCache,
}

/// Payload for one encode task.
pub(crate) struct EncodeTask {
    pub(crate) range: WorkRange,
    /// Extracted frames for `range`, in ascending index order.
    pub(crate) frames: Vec<Frame>,
    pub(crate) overlay: Option<PreparedOverlay>,
    pub(crate) guard: ResourceGuard,
    pub(crate) cache: FrameCache,
}

pub(crate) enum TaskRequest {
    Extract(ExtractTask),
    Encode(EncodeTask),
}

impl TaskRequest {
    fn range(&self) -> WorkRange {
        match self {
            TaskRequest::Extract(task) => task.range,
            TaskRequest::Encode(task) => task.range,
        }
    }
}

/// A task's successful reply.
#[derive(Debug)]
pub(crate) struct TaskReport {
    pub(crate) range: WorkRange,
    pub(crate) frames: Vec<Frame>,
    /// Indices that failed and were left out of `frames`.
    pub(crate) skipped: Vec<u64>,
    pub(crate) cache_hits: u64,
    /// Frames computed rather than read from the cache.
    pub(crate) processed: u64,
    pub(crate) cache_write_failures: u64,
}

impl TaskReport {
    pub(crate) fn new(range: WorkRange) -> Self {
        Self {
            range,
            frames: Vec::new(),
            skipped: Vec::new(),
            cache_hits: 0,
            processed: 0,
            cache_write_failures: 0,
        }
    }

    /// Number of frames this task accounted for, produced or skipped.
    pub(crate) fn handled(&self) -> u64 {
        (self.frames.len() + self.skipped.len()) as u64
    }

    /// Store `bytes` in the cache, falling back to memory-only on failure.
    pub(crate) fn persist(&mut self, cache: &FrameCache, stage: CacheStage, index: u64, bytes: &[u8]) {
        if let Err(error) = cache.write(stage, index, bytes) {
            log::warn!("{error}; keeping {stage} frame {index} in memory only");
            self.cache_write_failures += 1;
        }
    }
}

/// Why a task ended without a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskFailure {
    /// The task itself broke, independent of any one frame.
    Fatal(String),
    /// The caller cancelled the job.
    Cancelled,
    /// Another task failed fatally and the job is being torn down.
    Aborted,
}

impl From<RenderError> for TaskFailure {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::Cancelled => TaskFailure::Cancelled,
            other => TaskFailure::Fatal(other.to_string()),
        }
    }
}

/// Stop signals checked by tasks between frames.
#[derive(Debug, Clone)]
pub(crate) struct TaskControl {
    cancellation: Option<CancellationToken>,
    abort: CancellationToken,
}

impl TaskControl {
    pub(crate) fn new(cancellation: Option<CancellationToken>) -> Self {
        Self {
            cancellation,
            abort: CancellationToken::new(),
        }
    }

    /// Tell every running task of this job to stop at its next frame.
    pub(crate) fn abort(&self) {
        self.abort.cancel();
    }

    pub(crate) fn checkpoint(&self) -> Result<(), TaskFailure> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
        {
            return Err(TaskFailure::Cancelled);
        }
        if self.abort.is_cancelled() {
            return Err(TaskFailure::Aborted);
        }
        Ok(())
    }
}

pub(crate) type TaskReply = (WorkRange, Result<TaskReport, TaskFailure>);

/// Build a pool with one thread per worker slot.
pub(crate) fn build_pool(workers: usize) -> Result<ThreadPool, RenderError> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|slot| format!("animcard-worker-{slot}"))
        .build()
        .map_err(|error| RenderError::Io(std::io::Error::other(error.to_string())))
}

/// Send every request to the pool; replies arrive on the returned channel in
/// completion order. The channel closes once every task has replied.
pub(crate) fn dispatch(
    pool: &ThreadPool,
    requests: Vec<TaskRequest>,
    control: &TaskControl,
) -> Receiver<TaskReply> {
    let (sender, receiver) = mpsc::channel();
    for request in requests {
        let sender = sender.clone();
        let control = control.clone();
        pool.spawn(move || {
            let range = request.range();
            let result = run_task(request, &control);
            // The orchestrator only drops the receiver after every reply.
            let _ = sender.send((range, result));
        });
    }
    receiver
}

fn run_task(request: TaskRequest, control: &TaskControl) -> Result<TaskReport, TaskFailure> {
    let range = request.range();
    let outcome = catch_unwind(AssertUnwindSafe(|| match request {
        TaskRequest::Extract(task) => extract::run(task, control),
        TaskRequest::Encode(task) => encode::run(task, control),
    }));

    outcome.unwrap_or_else(|payload| {
        let reason = panic_message(payload.as_ref());
        log::error!("Worker for frames {range} panicked: {reason}");
        Err(TaskFailure::Fatal(format!("worker panicked: {reason}")))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
