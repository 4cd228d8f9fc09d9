//! Memory bounds for decoding.
//!
//! [`ResourceGuard`] carries the per-image pixel ceiling. It is checked
//! against header dimensions before any pixel buffer is allocated, and it is
//! turned into [`image::Limits`] for every decoder the pipeline constructs so
//! the codec itself refuses oversized allocations.
//!
//! Decoders are created per worker task and dropped when the task ends.
//! Nothing decoded is memoized between tasks or jobs; the disk cache is the
//! only thing that outlives a task.
//!
//! [`MemoryTracker`] records resident-set readings for diagnostic logging.
//! The orchestrator owns one per job.

use image::Limits;

use crate::error::RenderError;

/// Default ceiling on decodable pixels per image (100 megapixels).
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

/// Bytes per decoded pixel (RGBA8).
const BYTES_PER_PIXEL: u64 = 4;

/// Pixel-count ceiling applied to every decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGuard {
    max_pixels: u64,
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIXELS)
    }
}

impl ResourceGuard {
    /// Create a guard allowing at most `max_pixels` pixels per image.
    pub fn new(max_pixels: u64) -> Self {
        Self {
            max_pixels: max_pixels.max(1),
        }
    }

    /// The configured ceiling.
    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    /// Reject dimensions whose pixel count exceeds the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SourceDecode`] for oversized or empty images.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::SourceDecode(format!(
                "image has empty dimensions {width}x{height}"
            )));
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_pixels {
            return Err(RenderError::SourceDecode(format!(
                "image is {width}x{height} ({pixels} pixels), above the {} pixel ceiling",
                self.max_pixels
            )));
        }
        Ok(())
    }

    /// Decoder limits matching the ceiling.
    pub fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_pixels.saturating_mul(BYTES_PER_PIXEL));
        limits
    }
}

/// Resident-set readings taken at stage boundaries.
///
/// Readings come from `/proc/self/status` and are `None` on platforms that
/// do not expose it.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    last_rss_kb: Option<u64>,
    peak_rss_kb: Option<u64>,
    samples: u64,
}

impl MemoryTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all readings.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Take a reading and log it under `label`.
    pub fn sample(&mut self, label: &str) -> Option<u64> {
        self.record(label, current_rss_kb())
    }

    fn record(&mut self, label: &str, reading: Option<u64>) -> Option<u64> {
        self.samples += 1;
        if let Some(rss) = reading {
            log::debug!("Memory [{label}]: rss={rss} kB");
            self.last_rss_kb = Some(rss);
            self.peak_rss_kb = Some(self.peak_rss_kb.map_or(rss, |peak| peak.max(rss)));
        }
        reading
    }

    /// Most recent reading.
    pub fn last_rss_kb(&self) -> Option<u64> {
        self.last_rss_kb
    }

    /// Highest reading since the last reset.
    pub fn peak_rss_kb(&self) -> Option<u64> {
        self.peak_rss_kb
    }

    /// Number of readings attempted since the last reset.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(target_os = "linux")]
fn current_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn current_rss_kb() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_inclusive() {
        let guard = ResourceGuard::new(100);
        assert!(guard.check_dimensions(10, 10).is_ok());
        assert!(matches!(
            guard.check_dimensions(10, 11),
            Err(RenderError::SourceDecode(_))
        ));
    }

    #[test]
    fn empty_dimensions_rejected() {
        let guard = ResourceGuard::default();
        assert!(guard.check_dimensions(0, 10).is_err());
    }

    #[test]
    fn limits_cap_allocation() {
        let guard = ResourceGuard::new(1_000);
        assert_eq!(guard.limits().max_alloc, Some(4_000));
    }

    #[test]
    fn parses_vm_rss_line() {
        let status = "Name:\tanimcard\nVmPeak:\t  9000 kB\nVmRSS:\t  1234 kB\n";
        assert_eq!(parse_vm_rss(status), Some(1234));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn tracker_keeps_peak_until_reset() {
        let mut tracker = MemoryTracker::new();
        tracker.record("a", Some(10));
        tracker.record("b", Some(30));
        tracker.record("c", Some(20));
        tracker.record("d", None);
        assert_eq!(tracker.last_rss_kb(), Some(20));
        assert_eq!(tracker.peak_rss_kb(), Some(30));
        assert_eq!(tracker.samples(), 4);

        tracker.reset();
        assert_eq!(tracker.peak_rss_kb(), None);
        assert_eq!(tracker.samples(), 0);
    }
}
