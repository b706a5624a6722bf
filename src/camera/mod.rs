//! Capture devices and the per-slot camera pool.
//!
//! This module provides:
//! - `CaptureConfig`: resolution, frame rate, codec hint and exposure bias,
//!   fixed at open time
//! - `DeviceOpener` / `CaptureDevice`: the seam to a native capture backend
//! - `CameraPool`: one exclusively owned handle per stable slot
//!
//! Backends:
//! - Synthetic devices (`stub://`), with optional fault injection
//! - V4L2 devices (feature: camera-v4l2)

#[cfg(feature = "camera-v4l2")]
mod normalize;
mod pool;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use pool::{CameraHandle, CameraPool, PoolSummary};
pub use synthetic::SyntheticOpener;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Opener;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::error::OpenFailure;
use crate::frame::Frame;

/// Settings applied to every device when the pool opens it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Four-character codec hint (e.g. `HEVC`, `MJPG`).
    pub fourcc: [u8; 4],
    /// Exposure bias as a power-of-two exponent of seconds; negative is darker.
    pub exposure: i32,
}

impl CaptureConfig {
    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 3264,
            height: 2448,
            fps: 24,
            fourcc: *b"HEVC",
            exposure: -4,
        }
    }
}

/// An opened native capture device. Dropping it releases the device.
pub trait CaptureDevice: Send {
    /// Read the next frame. May block until the device delivers one.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Human-readable label for logs.
    fn label(&self) -> String;
}

/// Opens and configures devices by enumeration index.
pub trait DeviceOpener: Send + Sync {
    fn open(
        &self,
        enumeration_index: u32,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, OpenFailure>;
}

/// Select a backend from its configured name.
///
/// `stub://...` selects synthetic devices; `v4l2` selects local V4L2 nodes.
pub fn opener_for(backend: &str) -> Result<Arc<dyn DeviceOpener>> {
    if backend.starts_with("stub://") {
        return Ok(Arc::new(SyntheticOpener::from_uri(backend)?));
    }
    if backend == "v4l2" {
        #[cfg(feature = "camera-v4l2")]
        {
            return Ok(Arc::new(V4l2Opener::default()));
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            return Err(anyhow!("v4l2 capture requires the camera-v4l2 feature"));
        }
    }
    Err(anyhow!(
        "unsupported device backend '{}'; expected stub://... or v4l2",
        backend
    ))
}
