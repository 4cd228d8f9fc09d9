//! Animated GIF reassembly.
//!
//! Turns a finished [`RenderOutput`] back into a single animation. Frames are
//! decoded, quantised to a 256-colour palette, and written one at a time, so
//! only one frame is ever held decoded.
//!
//! # Example
//!
//! ```no_run
//! use animcard::{GifOptions, RenderError, RenderOptions, render, save_gif};
//!
//! let source = std::fs::read("banner.gif")?;
//! let output = render(&source, &RenderOptions::new(), "/tmp/banner-cache")?;
//! save_gif("banner-card.gif", &output, &GifOptions::new().with_repeat(None))?;
//! # Ok::<(), RenderError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use gif::{Encoder, Frame as GifFrame, Repeat};

use crate::conversion::decode_png;
use crate::error::RenderError;
use crate::frame::RenderOutput;
use crate::guard::ResourceGuard;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};

/// Configuration for GIF reassembly.
#[derive(Clone)]
pub struct GifOptions {
    /// How many times the GIF should repeat. `None` means loop forever.
    pub repeat: Option<u16>,
    speed: i32,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Debug for GifOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GifOptions")
            .field("repeat", &self.repeat)
            .field("speed", &self.speed)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            repeat: None,
            speed: 10,
            progress: None,
        }
    }
}

impl GifOptions {
    /// Create a new [`GifOptions`] with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repeat count. `None` means loop forever.
    #[must_use]
    pub fn with_repeat(mut self, repeat: Option<u16>) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the quantiser speed, clamped into `1..=30`.
    #[must_use]
    pub fn with_speed(mut self, speed: i32) -> Self {
        self.speed = speed.clamp(1, 30);
        self
    }

    /// Quantiser speed from 1 (best) to 30 (fastest). Default: 10.
    pub fn speed(&self) -> i32 {
        self.speed.clamp(1, 30)
    }

    /// Report one [`OperationType::GifExport`] step per written frame.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// Encode `output` as an animated GIF in memory.
///
/// Each frame keeps its own delay, rounded to the nearest hundredth of a
/// second. An empty output encodes to an empty buffer.
///
/// # Errors
///
/// Returns [`RenderError::GifEncode`] if a frame cannot be decoded, frames
/// differ in size, or the canvas is too large for GIF.
pub fn encode_gif(output: &RenderOutput, options: &GifOptions) -> Result<Vec<u8>, RenderError> {
    let mut buffer = Vec::new();
    write_gif(&mut buffer, output, options)?;
    Ok(buffer)
}

/// Encode `output` as an animated GIF at `path`.
///
/// Nothing is written for an empty output.
///
/// # Errors
///
/// As for [`encode_gif`], plus [`RenderError::GifEncode`] when the file
/// cannot be created.
pub fn save_gif<P: AsRef<Path>>(
    path: P,
    output: &RenderOutput,
    options: &GifOptions,
) -> Result<(), RenderError> {
    if output.frames.is_empty() {
        return Ok(());
    }
    let file = File::create(path.as_ref())
        .map_err(|e| RenderError::GifEncode(format!("Failed to create GIF file: {e}")))?;
    let mut writer = BufWriter::new(file);
    write_gif(&mut writer, output, options)?;
    writer
        .flush()
        .map_err(|e| RenderError::GifEncode(format!("Failed to flush GIF file: {e}")))
}

fn write_gif<W: Write>(
    writer: W,
    output: &RenderOutput,
    options: &GifOptions,
) -> Result<(), RenderError> {
    let Some(first) = output.frames.first() else {
        return Ok(());
    };
    log::debug!(
        "Encoding {} frames to GIF (repeat={:?}, speed={})",
        output.frames.len(),
        options.repeat,
        options.speed(),
    );

    let guard = ResourceGuard::default();
    let first_pixels = decode_png(&first.buffer, &guard)
        .map_err(|e| RenderError::GifEncode(format!("Failed to decode frame {}: {e}", first.index)))?;
    let (width, height) = first_pixels.dimensions();
    let gif_width = u16::try_from(width)
        .map_err(|_| RenderError::GifEncode(format!("Canvas width {width} exceeds GIF limit")))?;
    let gif_height = u16::try_from(height)
        .map_err(|_| RenderError::GifEncode(format!("Canvas height {height} exceeds GIF limit")))?;
    drop(first_pixels);

    let mut encoder = Encoder::new(writer, gif_width, gif_height, &[])
        .map_err(|e| RenderError::GifEncode(format!("Failed to create GIF encoder: {e}")))?;
    let repeat = match options.repeat {
        None => Repeat::Infinite,
        Some(n) => Repeat::Finite(n),
    };
    encoder
        .set_repeat(repeat)
        .map_err(|e| RenderError::GifEncode(format!("Failed to set GIF repeat: {e}")))?;

    let mut tracker = options.progress.as_ref().map(|callback| {
        ProgressTracker::new(
            Arc::clone(callback),
            OperationType::GifExport,
            Some(output.frames.len() as u64),
            1,
        )
    });

    for frame in &output.frames {
        let rgba = decode_png(&frame.buffer, &guard).map_err(|e| {
            RenderError::GifEncode(format!("Failed to decode frame {}: {e}", frame.index))
        })?;
        if rgba.dimensions() != (width, height) {
            return Err(RenderError::GifEncode(format!(
                "Frame {} is {}x{}, expected {width}x{height}",
                frame.index,
                rgba.width(),
                rgba.height()
            )));
        }
        let mut pixels = rgba.into_raw();

        let mut gif_frame = GifFrame::from_rgba_speed(gif_width, gif_height, &mut pixels, options.speed());
        gif_frame.delay = centiseconds(frame.delay_ms);

        encoder
            .write_frame(&gif_frame)
            .map_err(|e| RenderError::GifEncode(format!("Failed to write GIF frame: {e}")))?;
        if let Some(tracker) = tracker.as_mut() {
            tracker.advance_by(1, Some(frame.index));
        }
    }

    if let Some(tracker) = tracker.as_mut() {
        tracker.finish();
    }
    Ok(())
}

/// Milliseconds to GIF delay units, never below one unit.
fn centiseconds(delay_ms: u32) -> u16 {
    let rounded = (delay_ms.saturating_add(5) / 10).max(1);
    u16::try_from(rounded).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::conversion::{PngEffort, encode_png};
    use crate::frame::Frame;

    fn output(delays: &[u32]) -> RenderOutput {
        let frames = delays
            .iter()
            .enumerate()
            .map(|(index, &delay_ms)| Frame {
                index: index as u64,
                buffer: encode_png(
                    &RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255])),
                    PngEffort::Fast,
                )
                .unwrap(),
                delay_ms,
            })
            .collect();
        RenderOutput {
            frames,
            ..RenderOutput::default()
        }
    }

    #[test]
    fn delays_round_to_centiseconds() {
        assert_eq!(centiseconds(40), 4);
        assert_eq!(centiseconds(45), 5);
        assert_eq!(centiseconds(0), 1);
        assert_eq!(centiseconds(u32::MAX), u16::MAX);
    }

    #[test]
    fn gif_keeps_frame_count_and_delays() {
        let bytes = encode_gif(&output(&[40, 100, 250]), &GifOptions::new()).unwrap();

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(bytes.as_slice()).unwrap();
        assert_eq!((decoder.width(), decoder.height()), (6, 4));

        let mut delays = Vec::new();
        while let Some(frame) = decoder.next_frame_info().unwrap() {
            delays.push(frame.delay);
        }
        assert_eq!(delays, vec![4, 10, 25]);
    }

    #[test]
    fn progress_reports_every_frame() {
        use std::sync::Mutex;

        use crate::progress::ProgressInfo;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<u64>>);

        impl ProgressCallback for Recorder {
            fn on_progress(&self, info: &ProgressInfo) {
                assert_eq!(info.operation, OperationType::GifExport);
                self.0.lock().unwrap().push(info.current);
            }
        }

        let recorder = Arc::new(Recorder::default());
        encode_gif(
            &output(&[40, 40]),
            &GifOptions::new().with_progress(recorder.clone()),
        )
        .unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2, 2]);
    }

    #[test]
    fn empty_output_encodes_nothing() {
        assert!(encode_gif(&RenderOutput::default(), &GifOptions::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let mut output = output(&[40]);
        output.frames.push(Frame {
            index: 1,
            buffer: encode_png(&RgbaImage::new(2, 2), PngEffort::Fast).unwrap(),
            delay_ms: 40,
        });
        assert!(matches!(
            encode_gif(&output, &GifOptions::new()),
            Err(RenderError::GifEncode(_))
        ));
    }
}
