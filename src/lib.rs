//! # animcard
//!
//! Render animated cards: resize, optionally watermark, and re-encode every
//! frame of a multi-frame image with a resumable, worker-parallel pipeline.
//!
//! A render job flows strictly in one direction:
//!
//! ```text
//! probe -> partition -> extract (parallel) -> barrier -> encode (parallel) -> merge
//! ```
//!
//! Workers receive self-contained payloads and reply once. Every finished
//! frame is cached on disk under its `(stage, index)` name, so re-running a
//! job against the same cache directory skips everything already done.
//!
//! ## Quick Start
//!
//! ### Render an Animated Avatar
//!
//! ```no_run
//! use animcard::{RenderOptions, render};
//!
//! let source = std::fs::read("avatar.gif").unwrap();
//! let options = RenderOptions::new().with_canvas(256, 256);
//! let output = render(&source, &options, "/tmp/avatar-cache").unwrap();
//!
//! for frame in &output.frames {
//!     std::fs::write(format!("frame-{}.png", frame.index), &frame.buffer).unwrap();
//! }
//! ```
//!
//! ### Watermark Every Other Frame and Reassemble
//!
//! ```no_run
//! use animcard::{GifOptions, RenderOptions, encode_gif, render};
//!
//! let source = std::fs::read("banner.gif").unwrap();
//! let logo = std::fs::read("logo.png").unwrap();
//! let options = RenderOptions::new()
//!     .with_canvas(600, 200)
//!     .with_frame_skip(2)
//!     .with_overlay(logo, 0.6);
//!
//! let output = render(&source, &options, "/tmp/banner-cache").unwrap();
//! let gif = encode_gif(&output, &GifOptions::new()).unwrap();
//! std::fs::write("banner-card.gif", gif).unwrap();
//! ```
//!
//! ## Features
//!
//! - **Bounded memory**: a pixel ceiling is enforced from image headers before
//!   any frame buffer is allocated, and each worker holds one decoded frame
//!   at a time
//! - **Parallel stages**: extraction and encoding each fan out across a fixed
//!   pool, one task per contiguous [`WorkRange`]
//! - **Partial-failure tolerance**: a corrupt frame is logged and skipped;
//!   only structural worker failures abort a job
//! - **Resumable**: `<cache>/frame-<i>.png` and
//!   `<cache>/encoded/encoded-<i>.png` mark finished work, nothing else
//! - **Progress & cancellation**: cooperative callbacks and
//!   [`CancellationToken`]
//! - **Pluggable decoding**: [`SourceDecoder`] lets alternative codecs be
//!   swapped in
//! - **GIF reassembly**: [`encode_gif`] and [`save_gif`] honour per-frame
//!   delays
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | [`RenderFuture`] for rendering on Tokio's blocking pool |
//! | `full` | Enables all of the above |

pub mod cache;
pub mod composite;
pub mod configuration;
mod conversion;
mod encode;
pub mod error;
mod extract;
pub mod frame;
pub mod gif;
pub mod guard;
pub mod overlay;
pub mod partition;
pub mod progress;
pub mod render;
pub mod resize;
pub mod source;
#[cfg(feature = "async")]
pub mod stream;
mod worker;

pub use cache::{CacheStage, FrameCache};
pub use configuration::{DEFAULT_FRAME_DELAY_MS, RenderOptions, ResizeFilter};
pub use error::RenderError;
pub use frame::{Frame, RenderOutput, RenderStats};
pub use gif::{GifOptions, encode_gif, save_gif};
pub use guard::{DEFAULT_MAX_PIXELS, MemoryTracker, ResourceGuard};
pub use overlay::PreparedOverlay;
pub use partition::{WorkRange, partition, partition_strided, sampled_count};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use render::{FrameRenderer, RenderJob, render};
pub use source::{CodecDecoder, FrameIter, SourceDecoder, SourceInfo};
#[cfg(feature = "async")]
pub use stream::{RenderFuture, render_async};
