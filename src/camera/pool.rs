//! Per-slot camera pool.
//!
//! The pool owns one `CameraHandle` per stable slot. Other components only
//! reach a device through the slot-indexed API; no handle is ever shared.
//!
//! Opening is a fork-join: one worker per mapped device, all joined before
//! `open` returns. A slot whose device fails to open stays unhealthy with no
//! handle for the lifetime of the pool. Each slot sits behind its own lock, so
//! reads on different slots never wait on each other.
//!
//! Reads come in two classes. `read` is the capture path: it registers as a
//! waiter on the slot before taking the lock. `read_background` is the
//! preview path: it stands down while any waiter is registered, so a capture
//! waits for at most the one read already in flight on that slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use super::{CaptureConfig, CaptureDevice, DeviceOpener};
use crate::error::{OpenFailure, ReadFailure};
use crate::frame::Frame;
use crate::identity::{SlotEntry, SlotMapping};

/// Runtime state of one opened device.
pub struct CameraHandle {
    slot_index: usize,
    enumeration_index: u32,
    device: Box<dyn CaptureDevice>,
    last_read_ok: bool,
}

impl CameraHandle {
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn enumeration_index(&self) -> u32 {
        self.enumeration_index
    }

    pub fn last_read_ok(&self) -> bool {
        self.last_read_ok
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        log::info!(
            "CameraPool: slot {} released ({})",
            self.slot_index,
            self.device.label()
        );
    }
}

struct Slot {
    healthy: AtomicBool,
    released: AtomicBool,
    /// Capture reads queued for this slot's lock.
    capture_waiters: AtomicUsize,
    handle: Mutex<Option<CameraHandle>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            healthy: AtomicBool::new(false),
            released: AtomicBool::new(false),
            capture_waiters: AtomicUsize::new(0),
            handle: Mutex::new(None),
        }
    }

    fn capture_pending(&self) -> bool {
        self.capture_waiters.load(Ordering::SeqCst) > 0
    }
}

/// Result of opening the pool: how many mapped devices are ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSummary {
    pub healthy_count: usize,
    pub total_count: usize,
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} cameras ready",
            self.healthy_count, self.total_count
        )
    }
}

pub struct CameraPool {
    slots: Vec<Slot>,
    attempted: usize,
}

impl CameraPool {
    /// Open every mapped device concurrently and wait for all attempts.
    ///
    /// `capacity` is the configured camera count. Mapping rows whose slot is
    /// outside the capacity, or that repeat a slot, are skipped with a warning.
    pub fn open(
        mapping: &SlotMapping,
        config: &CaptureConfig,
        capacity: usize,
        opener: &dyn DeviceOpener,
    ) -> Self {
        let slots: Vec<Slot> = (0..capacity).map(|_| Slot::empty()).collect();
        let entries = admissible_entries(mapping, capacity);
        let attempted = entries.len();

        let outcomes: Vec<(&SlotEntry, Result<Box<dyn CaptureDevice>, OpenFailure>)> =
            thread::scope(|scope| {
                let workers: Vec<_> = entries
                    .iter()
                    .map(|&entry| {
                        let worker = scope
                            .spawn(move || opener.open(entry.enumeration_index, config));
                        (entry, worker)
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|(entry, worker)| {
                        let outcome = worker.join().unwrap_or_else(|_| {
                            Err(OpenFailure::Rejected {
                                enumeration_index: entry.enumeration_index,
                                reason: "open worker panicked".to_string(),
                            })
                        });
                        (entry, outcome)
                    })
                    .collect()
            });

        for (entry, outcome) in outcomes {
            let slot = &slots[entry.slot_index];
            match outcome {
                Ok(device) => {
                    log::info!(
                        "CameraPool: slot {} opened device {} ({})",
                        entry.slot_index,
                        entry.enumeration_index,
                        entry.stable_id
                    );
                    if let Ok(mut guard) = slot.handle.lock() {
                        *guard = Some(CameraHandle {
                            slot_index: entry.slot_index,
                            enumeration_index: entry.enumeration_index,
                            device,
                            last_read_ok: false,
                        });
                        slot.healthy.store(true, Ordering::SeqCst);
                    }
                }
                Err(err) => {
                    log::warn!(
                        "CameraPool: slot {} unavailable: {}",
                        entry.slot_index,
                        err
                    );
                }
            }
        }

        let pool = Self { slots, attempted };
        log::info!("CameraPool: {}", pool.summary());
        pool
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            healthy_count: self.healthy_slots().len(),
            total_count: self.attempted,
        }
    }

    /// Number of slots, healthy or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_healthy(&self, slot_index: usize) -> bool {
        self.slots
            .get(slot_index)
            .map(|slot| slot.healthy.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn healthy_slots(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.is_healthy(i))
            .collect()
    }

    /// Read one frame from one slot, ahead of any background reader.
    ///
    /// Blocks only on this slot's device. A failed read leaves health as is.
    pub fn read(&self, slot_index: usize) -> Result<Frame, ReadFailure> {
        let slot = self
            .slots
            .get(slot_index)
            .ok_or(ReadFailure::NoSuchSlot(slot_index))?;
        slot.capture_waiters.fetch_add(1, Ordering::SeqCst);
        let locked = slot.handle.lock();
        slot.capture_waiters.fetch_sub(1, Ordering::SeqCst);
        let mut guard = locked.map_err(|_| poisoned(slot_index))?;
        read_locked(slot, slot_index, &mut guard)
    }

    /// Read one frame unless a capture is waiting for this slot.
    ///
    /// Returns `Ok(None)` without touching the device when it stands down.
    pub fn read_background(&self, slot_index: usize) -> Result<Option<Frame>, ReadFailure> {
        let slot = self
            .slots
            .get(slot_index)
            .ok_or(ReadFailure::NoSuchSlot(slot_index))?;
        if slot.capture_pending() {
            return Ok(None);
        }
        let mut guard = slot.handle.lock().map_err(|_| poisoned(slot_index))?;
        // A capture may have queued while this reader waited for the lock.
        if slot.capture_pending() {
            return Ok(None);
        }
        read_locked(slot, slot_index, &mut guard).map(Some)
    }

    /// Whether the last read on this slot succeeded.
    pub fn last_read_ok(&self, slot_index: usize) -> bool {
        self.slots
            .get(slot_index)
            .and_then(|slot| slot.handle.lock().ok())
            .and_then(|guard| guard.as_ref().map(|h| h.last_read_ok))
            .unwrap_or(false)
    }

    /// Release one slot's device. Waits for an in-flight read on that slot.
    pub fn release(&self, slot_index: usize) {
        let Some(slot) = self.slots.get(slot_index) else {
            return;
        };
        let taken = match slot.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            slot.healthy.store(false, Ordering::SeqCst);
            slot.released.store(true, Ordering::SeqCst);
        }
        // Dropping the handle releases the device.
        drop(taken);
    }

    pub fn release_all(&self) {
        for slot_index in 0..self.slots.len() {
            self.release(slot_index);
        }
    }
}

impl Drop for CameraPool {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn poisoned(slot_index: usize) -> ReadFailure {
    ReadFailure::Device {
        slot: slot_index,
        reason: "slot lock poisoned".to_string(),
    }
}

fn read_locked(
    slot: &Slot,
    slot_index: usize,
    guard: &mut Option<CameraHandle>,
) -> Result<Frame, ReadFailure> {
    let handle = match guard.as_mut() {
        Some(handle) => handle,
        None if slot.released.load(Ordering::SeqCst) => {
            return Err(ReadFailure::Released(slot_index))
        }
        None => return Err(ReadFailure::NotOpened(slot_index)),
    };
    match handle.device.read_frame() {
        Ok(frame) => {
            handle.last_read_ok = true;
            Ok(frame)
        }
        Err(err) => {
            handle.last_read_ok = false;
            Err(ReadFailure::Device {
                slot: slot_index,
                reason: err.to_string(),
            })
        }
    }
}

fn admissible_entries(mapping: &SlotMapping, capacity: usize) -> Vec<&SlotEntry> {
    let mut seen = vec![false; capacity];
    let mut admitted = Vec::with_capacity(mapping.len());
    for entry in mapping.iter() {
        if entry.slot_index >= capacity {
            log::warn!(
                "CameraPool: mapping slot {} exceeds camera count {}; skipped",
                entry.slot_index,
                capacity
            );
            continue;
        }
        if seen[entry.slot_index] {
            log::warn!(
                "CameraPool: slot {} mapped twice; keeping first",
                entry.slot_index
            );
            continue;
        }
        seen[entry.slot_index] = true;
        admitted.push(entry);
    }
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticOpener;
    use crate::identity::DeviceDescriptor;
    use std::time::{Duration, Instant};

    fn mapping(count: u32) -> SlotMapping {
        SlotMapping::from_descriptors(
            (0..count)
                .map(|i| DeviceDescriptor {
                    enumeration_index: i,
                    stable_id: format!("ID{:02}", i),
                })
                .collect(),
        )
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            width: 16,
            height: 8,
            fps: 100,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn failed_opens_do_not_block_others() {
        let opener = SyntheticOpener::new().with_absent([1]).with_busy([3]);
        let pool = CameraPool::open(&mapping(5), &config(), 12, &opener);
        assert_eq!(
            pool.summary(),
            PoolSummary {
                healthy_count: 3,
                total_count: 5
            }
        );
        assert_eq!(pool.summary().to_string(), "3 of 5 cameras ready");
        assert_eq!(pool.capacity(), 12);
        assert_eq!(pool.healthy_slots(), vec![0, 2, 4]);
        assert_eq!(pool.read(1), Err(ReadFailure::NotOpened(1)));
        assert_eq!(pool.read(7), Err(ReadFailure::NotOpened(7)));
        assert_eq!(pool.read(12), Err(ReadFailure::NoSuchSlot(12)));
    }

    #[test]
    fn empty_mapping_opens_nothing() {
        let pool = CameraPool::open(&SlotMapping::empty(), &config(), 12, &SyntheticOpener::new());
        assert_eq!(
            pool.summary(),
            PoolSummary {
                healthy_count: 0,
                total_count: 0
            }
        );
    }

    #[test]
    fn read_failure_keeps_slot_healthy() {
        let opener = SyntheticOpener::new().with_failing_reads([0]);
        let pool = CameraPool::open(&mapping(2), &config(), 2, &opener);
        assert!(matches!(pool.read(0), Err(ReadFailure::Device { slot: 0, .. })));
        assert!(pool.is_healthy(0));
        assert!(!pool.last_read_ok(0));
        assert!(pool.read(1).is_ok());
        assert!(pool.last_read_ok(1));
    }

    #[test]
    fn released_slot_reports_released() {
        let pool = CameraPool::open(&mapping(2), &config(), 2, &SyntheticOpener::new());
        pool.release(0);
        assert_eq!(pool.read(0), Err(ReadFailure::Released(0)));
        assert!(!pool.is_healthy(0));
        assert!(pool.read(1).is_ok());
        pool.release_all();
        assert_eq!(pool.read(1), Err(ReadFailure::Released(1)));
    }

    #[test]
    fn out_of_range_and_duplicate_rows_are_skipped() {
        let rows = SlotMapping::from_entries(vec![
            SlotEntry {
                enumeration_index: 0,
                slot_index: 0,
                stable_id: "A".to_string(),
            },
            SlotEntry {
                enumeration_index: 1,
                slot_index: 5,
                stable_id: "B".to_string(),
            },
        ]);
        let pool = CameraPool::open(&rows, &config(), 2, &SyntheticOpener::new());
        assert_eq!(pool.summary().total_count, 1);
        assert_eq!(pool.healthy_slots(), vec![0]);
    }

    #[test]
    fn slot_reads_do_not_serialize() {
        let delay = Duration::from_millis(150);
        let opener = SyntheticOpener::new()
            .with_read_delay(0, delay)
            .with_read_delay(1, delay)
            .with_read_delay(2, delay);
        let pool = CameraPool::open(&mapping(3), &config(), 3, &opener);

        let start = Instant::now();
        thread::scope(|scope| {
            for slot in 0..3 {
                let pool = &pool;
                scope.spawn(move || pool.read(slot));
            }
        });
        assert!(start.elapsed() < delay * 3);
    }

    #[test]
    fn background_read_stands_down_for_waiting_capture() {
        let pool = CameraPool::open(&mapping(1), &config(), 1, &SyntheticOpener::new());
        assert!(matches!(pool.read_background(0), Ok(Some(_))));

        pool.slots[0].capture_waiters.fetch_add(1, Ordering::SeqCst);
        assert_eq!(pool.read_background(0), Ok(None));
        pool.slots[0].capture_waiters.fetch_sub(1, Ordering::SeqCst);

        assert!(matches!(pool.read_background(0), Ok(Some(_))));
        assert_eq!(pool.read_background(3), Err(ReadFailure::NoSuchSlot(3)));
    }
}
