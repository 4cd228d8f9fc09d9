//! Frame extraction stage.
//!
//! One task per [`WorkRange`](crate::WorkRange). For every sampled index the
//! task first looks for an `(extract, index)` cache entry and only decodes
//! the source when at least one sampled frame is missing. Decoded frames are
//! cover-fitted to the canvas, compressed to PNG, and written back to the
//! cache before the next frame is pulled, so a task holds at most one decoded
//! frame at a time.

use image::RgbaImage;

use crate::cache::CacheStage;
use crate::conversion::{PngEffort, encode_png};
use crate::error::RenderError;
use crate::frame::Frame;
use crate::resize;
use crate::worker::{ExtractTask, TaskControl, TaskFailure, TaskReport};

pub(crate) fn run(task: ExtractTask, control: &TaskControl) -> Result<TaskReport, TaskFailure> {
    let mut report = TaskReport::new(task.range);
    let delay_for = |index: u64| task.info.delay_ms(index, task.fallback_delay_ms);

    let mut pending = Vec::new();
    for index in task.range.sampled(task.stride) {
        control.checkpoint()?;
        match task.cache.read(CacheStage::Extract, index) {
            Ok(Some(buffer)) => {
                report.cache_hits += 1;
                report.frames.push(Frame {
                    index,
                    buffer,
                    delay_ms: delay_for(index),
                });
            }
            Ok(None) => pending.push(index),
            Err(error) => {
                log::warn!("{error}; extracting frame {index} again");
                pending.push(index);
            }
        }
    }

    if pending.is_empty() {
        log::debug!("Frames {} fully served from the extract cache", task.range);
        return Ok(report);
    }

    let mut decoded_frames = task
        .decoder
        .frames(&task.source, &task.guard)
        .map_err(TaskFailure::from)?;

    let mut wanted = pending.into_iter().peekable();
    let mut position = 0u64;
    while let Some(&next) = wanted.peek() {
        control.checkpoint()?;
        let Some(decoded) = decoded_frames.next() else {
            break;
        };
        let index = position;
        position += 1;
        if index != next {
            continue;
        }
        wanted.next();

        match decoded.and_then(|image| fit_and_compress(&image, &task)) {
            Ok(buffer) => {
                report.processed += 1;
                report.persist(&task.cache, CacheStage::Extract, index, &buffer);
                report.frames.push(Frame {
                    index,
                    buffer,
                    delay_ms: delay_for(index),
                });
            }
            Err(error) => {
                log::warn!("{}", RenderError::frame(CacheStage::Extract, index, error));
                report.skipped.push(index);
            }
        }
    }

    for index in wanted {
        log::warn!(
            "{}",
            RenderError::frame(
                CacheStage::Extract,
                index,
                format!("source ended after {position} frame(s)")
            )
        );
        report.skipped.push(index);
    }

    report.frames.sort_unstable_by_key(|frame| frame.index);
    log::debug!(
        "Extracted frames {}: {} decoded, {} cached, {} skipped",
        task.range,
        report.processed,
        report.cache_hits,
        report.skipped.len()
    );
    Ok(report)
}

fn fit_and_compress(image: &RgbaImage, task: &ExtractTask) -> Result<Vec<u8>, RenderError> {
    let (width, height) = task.canvas;
    let fitted = resize::cover(image, width, height, task.filter);
    encode_png(&fitted, PngEffort::Fast)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::{ImageFormat, Rgba};

    use super::*;
    use crate::cache::FrameCache;
    use crate::configuration::ResizeFilter;
    use crate::guard::ResourceGuard;
    use crate::partition::WorkRange;
    use crate::source::{FrameIter, SourceDecoder, SourceInfo};

    /// Yields `count` solid frames, with `broken` indices failing.
    struct Solid {
        count: u64,
        broken: Vec<u64>,
    }

    impl SourceDecoder for Solid {
        fn probe(&self, _: &[u8], _: &ResourceGuard) -> Result<SourceInfo, RenderError> {
            unreachable!("extraction never probes")
        }

        fn frames<'a>(&self, _: &'a [u8], _: &ResourceGuard) -> Result<FrameIter<'a>, RenderError> {
            let broken = self.broken.clone();
            Ok(Box::new((0..self.count).map(move |index| {
                if broken.contains(&index) {
                    Err(RenderError::SourceDecode(format!("corrupt frame {index}")))
                } else {
                    Ok(RgbaImage::from_pixel(4, 4, Rgba([index as u8, 0, 0, 255])))
                }
            })))
        }
    }

    fn task(decoder: Solid, range: WorkRange, stride: u64, cache: FrameCache) -> ExtractTask {
        let info = SourceInfo {
            width: 4,
            height: 4,
            format: ImageFormat::Gif,
            frame_delays_ms: vec![70; decoder.count as usize],
        };
        ExtractTask {
            source: Arc::from(&b""[..]),
            info: Arc::new(info),
            decoder: Arc::new(decoder),
            range,
            stride,
            canvas: (2, 2),
            filter: ResizeFilter::Nearest,
            fallback_delay_ms: 40,
            guard: ResourceGuard::default(),
            cache,
        }
    }

    #[test]
    fn extracts_sampled_frames_and_caches_them() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).unwrap();
        let decoder = Solid { count: 10, broken: vec![] };

        let report = run(
            task(decoder, WorkRange::new(2, 8), 2, cache.clone()),
            &TaskControl::new(None),
        )
        .unwrap();

        let indices: Vec<u64> = report.frames.iter().map(|frame| frame.index).collect();
        assert_eq!(indices, vec![2, 4, 6]);
        assert_eq!(report.processed, 3);
        assert_eq!(report.cache_hits, 0);
        assert!(report.frames.iter().all(|frame| frame.delay_ms == 70));
        assert_eq!(cache.cached_indices(CacheStage::Extract).unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).unwrap();
        let decoder = Solid { count: 5, broken: vec![3] };

        let report = run(
            task(decoder, WorkRange::new(0, 5), 1, cache),
            &TaskControl::new(None),
        )
        .unwrap();

        assert_eq!(report.frames.len(), 4);
        assert_eq!(report.skipped, vec![3]);
    }

    #[test]
    fn indices_past_the_source_are_skipped() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).unwrap();
        let decoder = Solid { count: 3, broken: vec![] };

        let report = run(
            task(decoder, WorkRange::new(0, 6), 1, cache),
            &TaskControl::new(None),
        )
        .unwrap();

        assert_eq!(report.frames.len(), 3);
        assert_eq!(report.skipped, vec![3, 4, 5]);
    }

    #[test]
    fn aborted_task_stops() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).unwrap();
        let control = TaskControl::new(None);
        control.abort();

        let result = run(
            task(Solid { count: 3, broken: vec![] }, WorkRange::new(0, 3), 1, cache),
            &control,
        );
        assert_eq!(result.unwrap_err(), TaskFailure::Aborted);
    }
}
