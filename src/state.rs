//! State shared between the daemon loop, the sensor poller and the operator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::sensor::SensorReading;
use crate::transform::ExposureCheck;

#[derive(Debug)]
pub struct RigState {
    running: AtomicBool,
    sensor: Mutex<SensorReading>,
    exposure: ExposureCheck,
}

impl RigState {
    pub fn new(threshold: u8) -> Self {
        Self {
            running: AtomicBool::new(true),
            sensor: Mutex::new(SensorReading::default()),
            exposure: ExposureCheck::new(threshold),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Last good sensor reading; last value wins.
    pub fn sensor(&self) -> SensorReading {
        match self.sensor.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_sensor(&self, reading: SensorReading) {
        match self.sensor.lock() {
            Ok(mut guard) => *guard = reading,
            Err(poisoned) => *poisoned.into_inner() = reading,
        }
    }

    pub fn exposure(&self) -> &ExposureCheck {
        &self.exposure
    }
}

impl Default for RigState {
    fn default() -> Self {
        Self::new(crate::transform::DEFAULT_OVEREXPOSURE_THRESHOLD)
    }
}
