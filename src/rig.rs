//! The rig: identity resolution, camera pool, preview and capture behind one
//! owner, one method per operator trigger.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;

use crate::camera::{opener_for, CameraPool, DeviceOpener, PoolSummary};
use crate::capture::{CaptureCoordinator, CaptureReport};
use crate::config::RigConfig;
use crate::error::PersistenceFailure;
use crate::frame::ChannelPolicy;
use crate::identity::{MappingFile, SlotMapping};
use crate::preview::{PreviewPump, PreviewSink, TickStats};
use crate::sensor::SensorReading;
use crate::state::RigState;
use crate::storage::{SpecimenStore, SpecimenTarget};

/// Everything one "capture now" produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub report: CaptureReport,
    /// Slot folders an existing specimen lacked; they were recreated on save.
    pub missing_folders: Vec<String>,
    /// Serial number of the environment row, if it was written.
    pub environment_row: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigStatus {
    pub pool: Option<PoolSummary>,
    pub healthy_slots: Vec<usize>,
    pub overexposure: Option<u8>,
    pub threshold: u8,
    pub sensor: SensorReading,
}

impl fmt::Display for RigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pool {
            Some(summary) => writeln!(f, "cameras: {} (slots {:?})", summary, self.healthy_slots)?,
            None => writeln!(f, "cameras: not opened")?,
        }
        match self.overexposure {
            Some(threshold) => writeln!(f, "overexposure check: on, threshold {}", threshold)?,
            None => writeln!(f, "overexposure check: off, threshold {}", self.threshold)?,
        }
        write!(f, "environment: {}", self.sensor)
    }
}

pub struct Rig {
    config: RigConfig,
    state: Arc<RigState>,
    opener: Arc<dyn DeviceOpener>,
    mapping_file: MappingFile,
    coordinator: CaptureCoordinator,
    pool: Option<Arc<CameraPool>>,
    preview: Option<PreviewPump>,
    shut_down: bool,
}

impl Rig {
    pub fn from_config(config: RigConfig) -> Result<Self> {
        let opener = opener_for(&config.device_backend)?;
        Ok(Self::with_opener(config, opener))
    }

    pub fn with_opener(config: RigConfig, opener: Arc<dyn DeviceOpener>) -> Self {
        let state = Arc::new(RigState::new(config.overexposure_threshold));
        Self {
            mapping_file: MappingFile::new(&config.mapping_path),
            config,
            state,
            opener,
            coordinator: CaptureCoordinator::new(ChannelPolicy::RedOnly),
            pool: None,
            preview: None,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RigState> {
        &self.state
    }

    pub fn pool(&self) -> Option<&CameraPool> {
        self.pool.as_deref()
    }

    /// "Generate/refresh mapping": resolve and rewrite the mapping file.
    pub fn refresh_mapping(&self) -> Result<SlotMapping> {
        self.config.resolver()?.resolve_into(&self.mapping_file)
    }

    /// "Open all cameras": release any open devices, then open the pool
    /// from the mapping file. A missing mapping opens zero cameras.
    pub fn open_cameras(&mut self) -> Result<PoolSummary> {
        self.close_cameras();
        let mapping = self.mapping_file.load_or_empty();
        let pool = Arc::new(CameraPool::open(
            &mapping,
            &self.config.capture,
            self.config.camera_count,
            &*self.opener,
        ));
        let summary = pool.summary();
        self.preview = Some(PreviewPump::start(Arc::clone(&pool), self.config.preview)?);
        self.pool = Some(pool);
        Ok(summary)
    }

    fn close_cameras(&mut self) {
        if let Some(mut preview) = self.preview.take() {
            preview.stop();
        }
        if let Some(pool) = self.pool.take() {
            pool.release_all();
        }
    }

    /// "Capture now" into `target`.
    ///
    /// The destination is checked before any frame is read; a missing or
    /// unwritable destination fails the whole capture and nothing is read.
    pub fn capture(&self, target: &SpecimenTarget) -> Result<CaptureOutcome, PersistenceFailure> {
        let (mut store, missing_folders) =
            SpecimenStore::prepare(target, self.config.camera_count)?;
        store.ensure_ready()?;

        let report = match &self.pool {
            Some(pool) => {
                let result = self.coordinator.capture_all(pool);
                self.coordinator.persist(&result, &mut store)
            }
            None => CaptureReport {
                absent: (0..self.config.camera_count).collect(),
                ..CaptureReport::default()
            },
        };

        let environment_row = match store.append_environment(&self.state.sensor()) {
            Ok(serial) => Some(serial),
            Err(err) => {
                log::error!("rig: environment row not written: {}", err);
                None
            }
        };
        log::info!("rig: capture into {}: {}", store.root().display(), report.summary());
        Ok(CaptureOutcome {
            report,
            missing_folders,
            environment_row,
        })
    }

    /// One cooperative preview refresh. A no-op before cameras are opened.
    pub fn preview_tick(&self, sink: &mut dyn PreviewSink) -> TickStats {
        match &self.preview {
            Some(preview) => preview.tick(self.state.exposure(), sink),
            None => TickStats::default(),
        }
    }

    /// Turn highlighting on (optionally with a new threshold) or off.
    pub fn set_overexposure(&self, enabled: bool, threshold: Option<u8>) {
        let exposure = self.state.exposure();
        if enabled {
            exposure.enable(threshold.unwrap_or_else(|| exposure.threshold()));
        } else {
            exposure.disable();
        }
    }

    /// Takes effect on the next preview frame.
    pub fn set_threshold(&self, threshold: u8) {
        self.state.exposure().update_threshold(threshold);
    }

    pub fn status(&self) -> RigStatus {
        let exposure = self.state.exposure();
        RigStatus {
            pool: self.pool.as_ref().map(|pool| pool.summary()),
            healthy_slots: self
                .pool
                .as_ref()
                .map(|pool| pool.healthy_slots())
                .unwrap_or_default(),
            overexposure: exposure.active_threshold(),
            threshold: exposure.threshold(),
            sensor: self.state.sensor(),
        }
    }

    /// Stop the loop flag and release every device. Runs once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.state.stop();
        self.close_cameras();
        self.shut_down = true;
        log::info!("rig: shut down");
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CaptureConfig, SyntheticOpener};
    use crate::preview::GridStatus;

    fn config(dir: &std::path::Path, count: usize) -> RigConfig {
        let mut cfg = RigConfig::defaults().unwrap();
        cfg.mapping_path = dir.join("camera_mapping.json");
        cfg.camera_count = count;
        cfg.capture = CaptureConfig {
            width: 8,
            height: 4,
            fps: 100,
            ..CaptureConfig::default()
        };
        cfg
    }

    #[test]
    fn missing_mapping_opens_zero_cameras() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::from_config(config(dir.path(), 4)).unwrap();
        let summary = rig.open_cameras().unwrap();
        assert_eq!(summary.healthy_count, 0);
        assert_eq!(summary.total_count, 0);

        let mut grid = GridStatus::new(4);
        let stats = rig.preview_tick(&mut grid);
        assert_eq!(stats.disconnected, 4);
    }

    #[test]
    fn refresh_then_open_then_capture() {
        let dir = tempfile::tempdir().unwrap();
        let opener = Arc::new(SyntheticOpener::new().with_absent([0]));
        let mut rig = Rig::with_opener(config(dir.path(), 3), opener);

        assert_eq!(rig.refresh_mapping().unwrap().len(), 3);
        let summary = rig.open_cameras().unwrap();
        assert_eq!((summary.healthy_count, summary.total_count), (2, 3));

        let outcome = rig
            .capture(&SpecimenTarget::New(dir.path().join("specimen")))
            .unwrap();
        assert_eq!(outcome.report.saved.len(), 2);
        assert_eq!(outcome.report.absent.len(), 1);
        assert_eq!(outcome.environment_row, Some(1));

        rig.shutdown();
        assert!(!rig.state().is_running());
        assert!(rig.pool().is_none());
    }

    #[test]
    fn capture_without_destination_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::from_config(config(dir.path(), 2)).unwrap();
        let missing = dir.path().join("gone");
        let err = rig
            .capture(&SpecimenTarget::Existing(missing.clone()))
            .unwrap_err();
        assert_eq!(err, PersistenceFailure::MissingDirectory(missing));
    }

    #[test]
    fn overexposure_toggles_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::from_config(config(dir.path(), 1)).unwrap();
        rig.set_overexposure(true, None);
        assert_eq!(rig.status().overexposure, Some(225));
        rig.set_threshold(180);
        assert_eq!(rig.status().overexposure, Some(180));
        rig.set_overexposure(false, None);
        assert_eq!(rig.status().overexposure, None);
        assert_eq!(rig.status().threshold, 180);
    }
}
