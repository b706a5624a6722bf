//! V4L2 capture devices.
//!
//! Enumeration index `N` opens `/dev/videoN`. The requested codec hint is
//! tried first; when the driver cannot deliver a decodable format the opener
//! falls back through RGB3, YUYV, MJPG and NV12. Exposure is switched to
//! manual and set from the bias as `2^bias` seconds.

use anyhow::Context;
use ouroboros::self_referencing;
use std::io;
use std::path::PathBuf;

use super::normalize::{to_rgb_frame, PixelFormat};
use super::{CaptureConfig, CaptureDevice, DeviceOpener};
use crate::error::OpenFailure;
use crate::frame::Frame;

const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const V4L2_EXPOSURE_MANUAL: i64 = 1;
const FALLBACK_FOURCCS: [&[u8; 4]; 4] = [b"RGB3", b"YUYV", b"MJPG", b"NV12"];
const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Debug)]
pub struct V4l2Opener {
    device_root: PathBuf,
}

impl Default for V4l2Opener {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from("/dev"),
        }
    }
}

impl V4l2Opener {
    pub fn with_device_root(root: impl Into<PathBuf>) -> Self {
        Self {
            device_root: root.into(),
        }
    }

    fn node_path(&self, enumeration_index: u32) -> PathBuf {
        self.device_root.join(format!("video{}", enumeration_index))
    }
}

/// Exposure bias to V4L2 absolute exposure, which counts 100 µs units.
pub(crate) fn exposure_units(bias: i32) -> i64 {
    let seconds = 2f64.powi(bias);
    ((seconds * 10_000.0).round() as i64).max(1)
}

fn classify_open_error(enumeration_index: u32, err: &io::Error) -> OpenFailure {
    if err.kind() == io::ErrorKind::NotFound {
        return OpenFailure::NotPresent { enumeration_index };
    }
    if is_busy(err) {
        return OpenFailure::Busy { enumeration_index };
    }
    OpenFailure::Rejected {
        enumeration_index,
        reason: err.to_string(),
    }
}

#[cfg(target_os = "linux")]
fn is_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBUSY)
}

#[cfg(not(target_os = "linux"))]
fn is_busy(_err: &io::Error) -> bool {
    false
}

impl DeviceOpener for V4l2Opener {
    fn open(
        &self,
        enumeration_index: u32,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, OpenFailure> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = self.node_path(enumeration_index);
        let rejected = |reason: String| OpenFailure::Rejected {
            enumeration_index,
            reason,
        };

        let device = v4l::Device::with_path(&path)
            .map_err(|err| classify_open_error(enumeration_index, &err))?;

        let (format, pixel_format) = negotiate_format(&device, config, &path)
            .map_err(|err| rejected(format!("{:#}", err)))?;

        if config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Opener: failed to set fps on {}: {}",
                    path.display(),
                    err
                );
            }
        }
        apply_exposure(&device, config.exposure, &path);

        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            },
        }
        .try_build()
        .map_err(|err| classify_open_error(enumeration_index, &err))?;

        log::info!(
            "V4l2Opener: opened {} ({}x{} {:?})",
            path.display(),
            format.width,
            format.height,
            pixel_format
        );
        Ok(Box::new(V4l2Device {
            path,
            state,
            width: format.width,
            height: format.height,
            pixel_format,
            frames: 0,
        }))
    }
}

fn negotiate_format(
    device: &v4l::Device,
    config: &CaptureConfig,
    path: &std::path::Path,
) -> anyhow::Result<(v4l::Format, PixelFormat)> {
    use v4l::video::Capture;

    let candidates = std::iter::once(&config.fourcc)
        .chain(FALLBACK_FOURCCS.into_iter().filter(|f| **f != config.fourcc));
    for fourcc in candidates {
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(fourcc);
        let applied = match device.set_format(&format) {
            Ok(applied) => applied,
            Err(err) => {
                log::warn!(
                    "V4l2Opener: failed to set {} on {}: {}",
                    String::from_utf8_lossy(fourcc),
                    path.display(),
                    err
                );
                continue;
            }
        };
        if let Some(pixel_format) = PixelFormat::from_fourcc(&applied.fourcc.repr) {
            if applied.width != config.width || applied.height != config.height {
                log::warn!(
                    "V4l2Opener: {} delivers {}x{} instead of {}x{}",
                    path.display(),
                    applied.width,
                    applied.height,
                    config.width,
                    config.height
                );
            }
            return Ok((applied, pixel_format));
        }
    }
    anyhow::bail!("no decodable pixel format on {}", path.display())
}

fn apply_exposure(device: &v4l::Device, bias: i32, path: &std::path::Path) {
    use v4l::control::{Control, Value};

    let controls = [
        (V4L2_CID_EXPOSURE_AUTO, V4L2_EXPOSURE_MANUAL),
        (V4L2_CID_EXPOSURE_ABSOLUTE, exposure_units(bias)),
    ];
    for (id, value) in controls {
        if let Err(err) = device.set_control(Control {
            id,
            value: Value::Integer(value),
        }) {
            log::warn!(
                "V4l2Opener: exposure control {:#x} rejected on {}: {}",
                id,
                path.display(),
                err
            );
        }
    }
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    path: PathBuf,
    state: DeviceV4l2State,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frames: u64,
}

impl CaptureDevice for V4l2Device {
    fn read_frame(&mut self) -> anyhow::Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let frame = self.state.with_mut(|fields| {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            to_rgb_frame(buf, width, height, pixel_format)
        })?;
        self.frames += 1;
        Ok(frame)
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        log::debug!(
            "V4l2Device {}: closing after {} frame(s)",
            self.path.display(),
            self.frames
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_bias_maps_to_hundred_microsecond_units() {
        assert_eq!(exposure_units(-4), 625);
        assert_eq!(exposure_units(-1), 5000);
        assert_eq!(exposure_units(-13), 1);
    }

    #[test]
    fn missing_node_is_not_present() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let opener = V4l2Opener::with_device_root(dir.path());
        let err = opener
            .open(3, &CaptureConfig::default())
            .err()
            .context("open of a missing node must fail")?;
        assert_eq!(
            err,
            OpenFailure::NotPresent {
                enumeration_index: 3
            }
        );
        Ok(())
    }
}
