//! Shared fixtures for the integration tests.
//!
//! Sources are built in memory with the `image` encoders so the tests need no
//! fixture files on disk.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use animcard::{
    CodecDecoder, FrameIter, RenderError, ResourceGuard, SourceDecoder, SourceInfo,
};
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, ImageFormat, Rgba, RgbaImage};

/// Colour of frame `index` in [`animated_gif`] sources.
pub fn frame_colour(index: usize) -> Rgba<u8> {
    let step = (index * 23 % 256) as u8;
    Rgba([step, 255 - step, 64, 255])
}

/// A `width × height` animated GIF whose frames each carry one of `delays_ms`.
pub fn animated_gif_with_delays(width: u32, height: u32, delays_ms: &[u32]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        let frames = delays_ms.iter().enumerate().map(|(index, &delay)| {
            Frame::from_parts(
                RgbaImage::from_pixel(width, height, frame_colour(index)),
                0,
                0,
                Delay::from_numer_denom_ms(delay, 1),
            )
        });
        encoder
            .encode_frames(frames)
            .expect("Failed to encode fixture GIF");
    }
    buffer
}

/// A `width × height` animated GIF with `count` frames of 100 ms.
pub fn animated_gif(width: u32, height: u32, count: usize) -> Vec<u8> {
    animated_gif_with_delays(width, height, &vec![100; count])
}

/// A single-colour GIF animation, useful for compositing checks.
pub fn solid_gif(width: u32, height: u32, count: usize, colour: Rgba<u8>) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        let frames = (0..count).map(|_| {
            Frame::from_parts(
                RgbaImage::from_pixel(width, height, colour),
                0,
                0,
                Delay::from_numer_denom_ms(100, 1),
            )
        });
        encoder
            .encode_frames(frames)
            .expect("Failed to encode fixture GIF");
    }
    buffer
}

/// Encode `image` as PNG.
pub fn png(image: &RgbaImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("Failed to encode fixture PNG");
    buffer
}

/// A `width × height` APNG whose frames each carry one of `delays_ms`.
pub fn animated_png(width: u32, height: u32, delays_ms: &[u16]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .set_animated(delays_ms.len() as u32, 0)
            .expect("Failed to mark fixture APNG animated");
        let mut writer = encoder
            .write_header()
            .expect("Failed to write fixture APNG header");
        for (index, &delay) in delays_ms.iter().enumerate() {
            let pixels: Vec<u8> = RgbaImage::from_pixel(width, height, frame_colour(index)).into_raw();
            writer
                .set_frame_delay(delay, 1000)
                .expect("Failed to set fixture APNG delay");
            writer
                .write_image_data(&pixels)
                .expect("Failed to write fixture APNG frame");
        }
        writer.finish().expect("Failed to finish fixture APNG");
    }
    buffer
}

/// Copy of an APNG with every `fdAT` zlib stream broken. Chunk headers and
/// the default image stay intact, so only a pixel decode notices.
pub fn damage_apng_frame_data(source: &[u8]) -> Vec<u8> {
    let mut damaged = source.to_vec();
    let mut offset = 8;
    while offset + 8 <= damaged.len() {
        let length = u32::from_be_bytes(
            damaged[offset..offset + 4]
                .try_into()
                .expect("Failed to read chunk length"),
        ) as usize;
        let body = offset + 8;
        // Sequence number, then the zlib header.
        if &damaged[offset + 4..offset + 8] == b"fdAT" && length >= 6 {
            damaged[body + 4] = 0xFF;
            damaged[body + 5] = 0xFF;
        }
        offset = body + length + 4;
    }
    damaged
}

/// Decode a rendered frame.
pub fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .expect("Failed to decode rendered frame")
        .into_rgba8()
}

/// Wraps [`CodecDecoder`] to inject failures and count decoder openings.
#[derive(Default)]
pub struct FaultyDecoder {
    /// Frame indices that decode as errors.
    pub corrupt: Vec<u64>,
    /// Fail every `frames` call outright.
    pub fatal: bool,
    /// Panic when this frame index is reached.
    pub panic_at: Option<u64>,
    probes: AtomicUsize,
    openings: AtomicUsize,
}

impl FaultyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrupting(indices: &[u64]) -> Self {
        Self {
            corrupt: indices.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fatal: true,
            ..Self::default()
        }
    }

    pub fn panicking_at(index: u64) -> Self {
        Self {
            panic_at: Some(index),
            ..Self::default()
        }
    }

    /// Number of times a worker opened a frame iterator.
    pub fn openings(&self) -> usize {
        self.openings.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl SourceDecoder for FaultyDecoder {
    fn probe(&self, source: &[u8], guard: &ResourceGuard) -> Result<SourceInfo, RenderError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        CodecDecoder.probe(source, guard)
    }

    fn frames<'a>(
        &self,
        source: &'a [u8],
        guard: &ResourceGuard,
    ) -> Result<FrameIter<'a>, RenderError> {
        self.openings.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(RenderError::SourceDecode(
                "decoder backend unavailable".to_string(),
            ));
        }

        let corrupt = self.corrupt.clone();
        let panic_at = self.panic_at;
        let inner = CodecDecoder.frames(source, guard)?;
        Ok(Box::new(inner.enumerate().map(move |(index, frame)| {
            let index = index as u64;
            if panic_at == Some(index) {
                panic!("decoder crashed at frame {index}");
            }
            if corrupt.contains(&index) {
                return Err(RenderError::SourceDecode(format!(
                    "corrupt frame {index}"
                )));
            }
            frame
        })))
    }
}
