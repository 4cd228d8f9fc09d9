//! Frame encode stage.
//!
//! One task per [`WorkRange`](crate::WorkRange), dispatched only after every
//! extraction task of the job has replied. Each extracted frame is decoded,
//! composited with the job's [`PreparedOverlay`](crate::PreparedOverlay) if
//! there is one, and recompressed at maximum effort. An existing
//! `(encode, index)` cache entry short-circuits all of that.

use crate::cache::CacheStage;
use crate::conversion::{PngEffort, decode_png, encode_png};
use crate::error::RenderError;
use crate::frame::Frame;
use crate::guard::ResourceGuard;
use crate::overlay::PreparedOverlay;
use crate::worker::{EncodeTask, TaskControl, TaskFailure, TaskReport};

pub(crate) fn run(task: EncodeTask, control: &TaskControl) -> Result<TaskReport, TaskFailure> {
    let EncodeTask {
        range,
        frames,
        overlay,
        guard,
        cache,
    } = task;
    let mut report = TaskReport::new(range);

    for frame in frames {
        control.checkpoint()?;
        let Frame {
            index,
            buffer,
            delay_ms,
        } = frame;

        match cache.read(CacheStage::Encode, index) {
            Ok(Some(encoded)) => {
                report.cache_hits += 1;
                report.frames.push(Frame {
                    index,
                    buffer: encoded,
                    delay_ms,
                });
                continue;
            }
            Ok(None) => {}
            Err(error) => log::warn!("{error}; encoding frame {index} again"),
        }

        let encoded = encode_frame(&buffer, overlay.as_ref(), &guard);
        drop(buffer);
        match encoded {
            Ok(encoded) => {
                report.processed += 1;
                report.persist(&cache, CacheStage::Encode, index, &encoded);
                report.frames.push(Frame {
                    index,
                    buffer: encoded,
                    delay_ms,
                });
            }
            Err(error) => {
                log::warn!("{}", RenderError::frame(CacheStage::Encode, index, error));
                report.skipped.push(index);
            }
        }
    }

    log::debug!(
        "Encoded frames {}: {} encoded, {} cached, {} skipped",
        range,
        report.processed,
        report.cache_hits,
        report.skipped.len()
    );
    Ok(report)
}

fn encode_frame(
    extracted: &[u8],
    overlay: Option<&PreparedOverlay>,
    guard: &ResourceGuard,
) -> Result<Vec<u8>, RenderError> {
    let mut pixels = decode_png(extracted, guard)?;
    if let Some(overlay) = overlay {
        overlay.apply(&mut pixels)?;
    }
    encode_png(&pixels, PngEffort::Best)
}
