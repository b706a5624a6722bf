//! Synchronized "capture all" across the pool.
//!
//! One capture cycle reads one frame from every healthy slot. The reads run
//! concurrently, so the cycle takes as long as the slowest camera rather than
//! the sum. Partial success is the normal case: absent slots are recorded and
//! the cycle itself never fails.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;

use crate::camera::CameraPool;
use crate::error::{PersistenceFailure, ReadFailure};
use crate::frame::{ChannelPolicy, Frame};

/// Why a slot has no frame in this cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbsenceReason {
    /// The slot never opened; no read was attempted.
    NotOpened,
    /// The read failed this cycle. The slot stays healthy for the next one.
    ReadFailed(ReadFailure),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotOutcome {
    Captured(Frame),
    Absent(AbsenceReason),
}

impl SlotOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, SlotOutcome::Captured(_))
    }
}

/// Per-slot outcome of one capture cycle, covering every slot in the pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureResult {
    outcomes: BTreeMap<usize, SlotOutcome>,
}

impl CaptureResult {
    pub fn get(&self, slot_index: usize) -> Option<&SlotOutcome> {
        self.outcomes.get(&slot_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SlotOutcome)> {
        self.outcomes.iter().map(|(slot, outcome)| (*slot, outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn captured_slots(&self) -> Vec<usize> {
        self.iter()
            .filter(|(_, outcome)| outcome.is_captured())
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn absent_slots(&self) -> Vec<usize> {
        self.iter()
            .filter(|(_, outcome)| !outcome.is_captured())
            .map(|(slot, _)| slot)
            .collect()
    }
}

/// Destination for captured frames.
pub trait CaptureSink {
    /// Persist one already post-processed frame for `slot_index`.
    fn save_frame(&mut self, slot_index: usize, frame: &Frame)
        -> Result<PathBuf, PersistenceFailure>;
}

/// What happened to one capture cycle's frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub saved: Vec<(usize, PathBuf)>,
    pub absent: Vec<usize>,
    pub failed_writes: Vec<(usize, String)>,
}

impl CaptureReport {
    pub fn summary(&self) -> String {
        format!(
            "{} saved, {} absent, {} failed",
            self.saved.len(),
            self.absent.len(),
            self.failed_writes.len()
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureCoordinator {
    policy: ChannelPolicy,
}

impl CaptureCoordinator {
    pub fn new(policy: ChannelPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    /// Read one frame from every healthy slot, concurrently.
    ///
    /// Unhealthy slots are recorded as absent without a read. Failed reads are
    /// not retried within the cycle.
    pub fn capture_all(&self, pool: &CameraPool) -> CaptureResult {
        let healthy = pool.healthy_slots();
        let reads: Vec<(usize, Result<Frame, ReadFailure>)> = thread::scope(|scope| {
            let workers: Vec<_> = healthy
                .iter()
                .map(|&slot| (slot, scope.spawn(move || pool.read(slot))))
                .collect();
            workers
                .into_iter()
                .map(|(slot, worker)| {
                    let read = worker.join().unwrap_or_else(|_| {
                        Err(ReadFailure::Device {
                            slot,
                            reason: "read worker panicked".to_string(),
                        })
                    });
                    (slot, read)
                })
                .collect()
        });

        let mut outcomes: BTreeMap<usize, SlotOutcome> = (0..pool.capacity())
            .map(|slot| (slot, SlotOutcome::Absent(AbsenceReason::NotOpened)))
            .collect();
        for (slot, read) in reads {
            let outcome = match read {
                Ok(frame) => SlotOutcome::Captured(frame),
                Err(err) => {
                    log::warn!("CaptureCoordinator: {}", err);
                    SlotOutcome::Absent(AbsenceReason::ReadFailed(err))
                }
            };
            outcomes.insert(slot, outcome);
        }

        let result = CaptureResult { outcomes };
        log::info!(
            "CaptureCoordinator: captured {} of {} healthy slot(s)",
            result.captured_slots().len(),
            healthy.len()
        );
        result
    }

    /// Apply the channel policy and hand each captured frame to `sink`.
    ///
    /// A failed write on one slot does not stop the others.
    pub fn persist(&self, result: &CaptureResult, sink: &mut dyn CaptureSink) -> CaptureReport {
        let mut report = CaptureReport::default();
        for (slot, outcome) in result.iter() {
            let frame = match outcome {
                SlotOutcome::Captured(frame) => frame,
                SlotOutcome::Absent(_) => {
                    report.absent.push(slot);
                    continue;
                }
            };
            let processed = match self.policy.apply(frame) {
                Ok(processed) => processed,
                Err(err) => {
                    log::error!("CaptureCoordinator: slot {} post-processing: {}", slot, err);
                    report.failed_writes.push((slot, err.to_string()));
                    continue;
                }
            };
            match sink.save_frame(slot, &processed) {
                Ok(path) => report.saved.push((slot, path)),
                Err(err) => {
                    log::error!("CaptureCoordinator: slot {}: {}", slot, err);
                    report.failed_writes.push((slot, err.to_string()));
                }
            }
        }
        report
    }
}
