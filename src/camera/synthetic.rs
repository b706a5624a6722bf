//! Synthetic capture devices for tests and hardware-free runs.
//!
//! `stub://<name>?absent=1,4&busy=2&fail=3&stall=5` opens every enumeration
//! index except those listed as absent or busy; devices listed under `fail`
//! open normally but every read fails, and devices under `stall` take
//! `STALL_DELAY` per read. Reads are paced at the configured fps.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use super::{CaptureConfig, CaptureDevice, DeviceOpener};
use crate::error::OpenFailure;
use crate::frame::Frame;

/// Synthetic frames never exceed this size, whatever the requested resolution.
const MAX_SYNTHETIC_WIDTH: u32 = 640;
const MAX_SYNTHETIC_HEIGHT: u32 = 480;
const STALL_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Default)]
pub struct SyntheticOpener {
    absent: BTreeSet<u32>,
    busy: BTreeSet<u32>,
    failing: BTreeSet<u32>,
    delays: BTreeMap<u32, Duration>,
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic backend uri must start with stub://"))?;
        let mut opener = Self::new();
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(opener);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            let indices = parse_indices(value)?;
            match key {
                "absent" => opener.absent.extend(indices),
                "busy" => opener.busy.extend(indices),
                "fail" => opener.failing.extend(indices),
                "stall" => opener
                    .delays
                    .extend(indices.into_iter().map(|i| (i, STALL_DELAY))),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        Ok(opener)
    }

    pub fn with_absent(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.absent.extend(indices);
        self
    }

    pub fn with_busy(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.busy.extend(indices);
        self
    }

    pub fn with_failing_reads(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(indices);
        self
    }

    /// Make every read on `index` take at least `delay`.
    pub fn with_read_delay(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }
}

fn parse_indices(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse()
                .map_err(|_| anyhow!("stub device index '{}' is not an integer", v))
        })
        .collect()
}

impl DeviceOpener for SyntheticOpener {
    fn open(
        &self,
        enumeration_index: u32,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, OpenFailure> {
        if self.absent.contains(&enumeration_index) {
            return Err(OpenFailure::NotPresent { enumeration_index });
        }
        if self.busy.contains(&enumeration_index) {
            return Err(OpenFailure::Busy { enumeration_index });
        }
        if config.width == 0 || config.height == 0 {
            return Err(OpenFailure::Rejected {
                enumeration_index,
                reason: "zero resolution".to_string(),
            });
        }
        let interval = if config.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / config.fps
        };
        let delay = self
            .delays
            .get(&enumeration_index)
            .copied()
            .unwrap_or(Duration::ZERO);
        log::info!(
            "SyntheticDevice {}: opened ({} @ {} fps, exposure {})",
            enumeration_index,
            config.fourcc_str(),
            config.fps,
            config.exposure
        );
        Ok(Box::new(SyntheticDevice {
            index: enumeration_index,
            width: config.width.min(MAX_SYNTHETIC_WIDTH),
            height: config.height.min(MAX_SYNTHETIC_HEIGHT),
            frame_interval: interval.max(delay),
            fail_reads: self.failing.contains(&enumeration_index),
            frame_count: 0,
            last_frame_at: None,
        }))
    }
}

struct SyntheticDevice {
    index: u32,
    width: u32,
    height: u32,
    frame_interval: Duration,
    fail_reads: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticDevice {
    fn pace(&mut self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        } else if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// A moving diagonal gradient; the red channel also carries the device
    /// index so frames from different devices differ.
    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                let base = (x + y + self.frame_count as usize) % 256;
                pixels[offset] = (base as u8).wrapping_add((self.index * 16) as u8);
                pixels[offset + 1] = base as u8;
                pixels[offset + 2] = (255 - base) as u8;
            }
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Frame> {
        self.pace();
        if self.fail_reads {
            return Err(anyhow!("synthetic device {} read failure", self.index));
        }
        self.frame_count += 1;
        Frame::rgb(self.width, self.height, self.generate_pixels())
    }

    fn label(&self) -> String {
        format!("stub device {}", self.index)
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        log::debug!(
            "SyntheticDevice {}: released after {} frame(s)",
            self.index,
            self.frame_count
        );
    }
}
