use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CaptureConfig;
use crate::identity::{
    CommandLister, DeviceIdentityResolver, DeviceLister, IdentifierExtractor,
    PnpInstanceExtractor, StaticLister, SysfsLister, UsbPortExtractor, DEFAULT_MAPPING_PATH,
};
use crate::preview::PreviewSettings;
use crate::transform::DEFAULT_OVEREXPOSURE_THRESHOLD;
use crate::MAX_CAMERAS;

const DEFAULT_DEVICE_BACKEND: &str = "stub://rig";
const DEFAULT_PREVIEW_INTERVAL_MS: u64 = 10;
const MIN_EXPOSURE: i32 = -13;
const MAX_EXPOSURE: i32 = -1;

#[derive(Debug, Deserialize, Default)]
struct RigConfigFile {
    mapping_path: Option<PathBuf>,
    camera_count: Option<usize>,
    capture: Option<CaptureConfigFile>,
    preview: Option<PreviewConfigFile>,
    devices: Option<DevicesConfigFile>,
    sensor: Option<SensorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    codec: Option<String>,
    exposure: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    interval_ms: Option<u64>,
    rotate_180: Option<bool>,
    overexposure_threshold: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DevicesConfigFile {
    backend: Option<String>,
    lister: Option<ListerKind>,
    command: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    sysfs_root: Option<PathBuf>,
    extractor: Option<ExtractorKind>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    port: Option<PathBuf>,
}

/// How devices are enumerated for identity resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListerKind {
    Command,
    Sysfs,
    Stub,
}

/// How a stable identifier is pulled out of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    Pnp,
    UsbPort,
}

impl ExtractorKind {
    pub fn build(self) -> Box<dyn IdentifierExtractor> {
        match self {
            ExtractorKind::Pnp => Box::new(PnpInstanceExtractor),
            ExtractorKind::UsbPort => Box::new(UsbPortExtractor),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListerSettings {
    pub kind: ListerKind,
    /// Listing command and arguments; empty selects the Windows PnP query.
    pub command: Vec<String>,
    /// Lines containing any of these (case-insensitive) are cameras.
    pub keywords: Vec<String>,
    pub sysfs_root: Option<PathBuf>,
}

impl ListerSettings {
    pub fn build(&self, camera_count: usize) -> Result<Box<dyn DeviceLister>> {
        Ok(match self.kind {
            ListerKind::Command if self.command.is_empty() => Box::new(CommandLister::windows_pnp()),
            ListerKind::Command => Box::new(CommandLister::new(&self.command, &self.keywords)?),
            ListerKind::Sysfs => match &self.sysfs_root {
                Some(root) => Box::new(SysfsLister::new(root)),
                None => Box::new(SysfsLister::default()),
            },
            ListerKind::Stub => Box::new(StaticLister::synthetic_rig(camera_count)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RigConfig {
    pub mapping_path: PathBuf,
    pub camera_count: usize,
    pub capture: CaptureConfig,
    pub preview: PreviewSettings,
    pub overexposure_threshold: u8,
    pub device_backend: String,
    pub lister: ListerSettings,
    pub extractor: ExtractorKind,
    /// Serial device of the environment board. The port must be set to
    /// 9600 baud 8N1 before the daemon starts.
    pub sensor_port: Option<PathBuf>,
}

impl RigConfig {
    /// File named by `RIG_CONFIG`, then defaults, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RIG_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults, as if no file and no environment were present.
    pub fn defaults() -> Result<Self> {
        let mut cfg = Self::from_file(RigConfigFile::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RigConfigFile) -> Result<Self> {
        let defaults = CaptureConfig::default();
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureConfig {
            width: capture_file.width.unwrap_or(defaults.width),
            height: capture_file.height.unwrap_or(defaults.height),
            fps: capture_file.fps.unwrap_or(defaults.fps),
            fourcc: match capture_file.codec {
                Some(codec) => parse_fourcc(&codec)?,
                None => defaults.fourcc,
            },
            exposure: capture_file.exposure.unwrap_or(defaults.exposure),
        };
        let preview_file = file.preview.unwrap_or_default();
        let preview = PreviewSettings {
            interval: Duration::from_millis(
                preview_file
                    .interval_ms
                    .unwrap_or(DEFAULT_PREVIEW_INTERVAL_MS),
            ),
            rotate_180: preview_file.rotate_180.unwrap_or(false),
        };
        let devices = file.devices.unwrap_or_default();
        let lister = ListerSettings {
            kind: devices.lister.unwrap_or(ListerKind::Stub),
            command: devices.command.unwrap_or_default(),
            keywords: devices
                .keywords
                .unwrap_or_else(crate::identity::default_keywords),
            sysfs_root: devices.sysfs_root,
        };
        Ok(Self {
            mapping_path: file
                .mapping_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_PATH)),
            camera_count: file.camera_count.unwrap_or(MAX_CAMERAS),
            capture,
            preview,
            overexposure_threshold: preview_file
                .overexposure_threshold
                .unwrap_or(DEFAULT_OVEREXPOSURE_THRESHOLD),
            device_backend: devices
                .backend
                .unwrap_or_else(|| DEFAULT_DEVICE_BACKEND.to_string()),
            lister,
            extractor: devices.extractor.unwrap_or(ExtractorKind::Pnp),
            sensor_port: file.sensor.and_then(|sensor| sensor.port),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("RIG_MAPPING_PATH") {
            if !path.trim().is_empty() {
                self.mapping_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("RIG_DEVICE_BACKEND") {
            if !backend.trim().is_empty() {
                self.device_backend = backend;
            }
        }
        if let Ok(port) = std::env::var("RIG_SENSOR_PORT") {
            if !port.trim().is_empty() {
                self.sensor_port = Some(PathBuf::from(port));
            }
        }
        if let Ok(count) = std::env::var("RIG_CAMERA_COUNT") {
            self.camera_count = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("RIG_CAMERA_COUNT must be an integer"))?;
        }
        if let Ok(exposure) = std::env::var("RIG_EXPOSURE") {
            self.capture.exposure = exposure
                .trim()
                .parse()
                .map_err(|_| anyhow!("RIG_EXPOSURE must be a signed integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera_count == 0 || self.camera_count > MAX_CAMERAS {
            return Err(anyhow!(
                "camera_count must be between 1 and {}",
                MAX_CAMERAS
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture resolution must be non-zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if !(MIN_EXPOSURE..=MAX_EXPOSURE).contains(&self.capture.exposure) {
            return Err(anyhow!(
                "exposure bias must be between {} and {}",
                MIN_EXPOSURE,
                MAX_EXPOSURE
            ));
        }
        if self.preview.interval.is_zero() {
            return Err(anyhow!("preview interval must be greater than zero"));
        }
        if self.lister.kind == ListerKind::Command && !self.lister.command.is_empty() {
            CommandLister::new(&self.lister.command, &self.lister.keywords)?;
        }
        Ok(())
    }

    pub fn resolver(&self) -> Result<DeviceIdentityResolver> {
        Ok(DeviceIdentityResolver::new(
            self.lister.build(self.camera_count)?,
            self.extractor.build(),
        ))
    }
}

fn parse_fourcc(codec: &str) -> Result<[u8; 4]> {
    let bytes = codec.as_bytes();
    match <[u8; 4]>::try_from(bytes) {
        Ok(fourcc) if fourcc.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => Ok(fourcc),
        _ => Err(anyhow!(
            "codec must be exactly four ASCII characters, got '{}'",
            codec
        )),
    }
}

fn read_config_file(path: &Path) -> Result<RigConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().and_then(|ext| ext.to_str()) == Some("toml") {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
