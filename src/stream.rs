//! Async rendering.
//!
//! [`RenderFuture`] runs a whole render job on Tokio's blocking thread pool
//! via `tokio::task::spawn_blocking`, so CPU-heavy decoding and encoding never
//! ties up the runtime's cooperative task budget. The job itself still fans
//! out across its own worker pool exactly as the blocking
//! [`FrameRenderer::render`] does.
//!
//! # Example
//!
//! ```no_run
//! use animcard::{RenderError, RenderJob, RenderOptions, render_async};
//!
//! # async fn example() -> Result<(), RenderError> {
//! let source = std::fs::read("avatar.gif")?;
//! let job = RenderJob::new(source, "/tmp/avatar-cache");
//! let output = render_async(job, RenderOptions::new()).await?;
//! println!("Rendered {} frames", output.frames.len());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::configuration::RenderOptions;
use crate::error::RenderError;
use crate::frame::RenderOutput;
use crate::render::{FrameRenderer, RenderJob};

/// A future that resolves to a finished render.
///
/// Created via [`FrameRenderer::render_async`] or [`render_async`]. Dropping
/// the future does not stop the job; use a
/// [`CancellationToken`](crate::CancellationToken) for that.
pub struct RenderFuture {
    handle: JoinHandle<Result<RenderOutput, RenderError>>,
}

impl Future for RenderFuture {
    type Output = Result<RenderOutput, RenderError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(RenderError::Cancelled)))
    }
}

impl FrameRenderer {
    /// Render `job` on a blocking thread.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn render_async(&self, job: RenderJob) -> RenderFuture {
        let renderer = self.clone();
        let handle = tokio::task::spawn_blocking(move || renderer.render(&job));
        RenderFuture { handle }
    }
}

/// Render `job` with `options` on a blocking thread.
///
/// Must be called from within a Tokio runtime.
pub fn render_async(job: RenderJob, options: RenderOptions) -> RenderFuture {
    FrameRenderer::new(options).render_async(job)
}
