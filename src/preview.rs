//! Live preview pump.
//!
//! Each healthy slot gets a reader thread that keeps pulling frames through
//! the pool and parks the newest one in a one-frame cell. The cooperative
//! timer loop calls `tick`, which never touches a device: it takes whatever
//! frame is ready per slot, runs the preview transform and hands the result
//! to the grid display. A stalled camera leaves only its own cell stale.
//! Readers use the pool's background read, so a capture on the same slot
//! never queues behind more than one preview read.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::camera::CameraPool;
use crate::frame::Frame;
use crate::transform::{ExposureCheck, PreviewTransform};

pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(10);

/// Grid display collaborator.
pub trait PreviewSink {
    fn show_frame(&mut self, slot_index: usize, frame: &Frame);
    fn show_message(&mut self, slot_index: usize, message: &str);
}

pub fn disconnected_message(slot_index: usize) -> String {
    format!("Please connect camera {}", slot_index)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreviewSettings {
    pub interval: Duration,
    pub rotate_180: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PREVIEW_INTERVAL,
            rotate_180: false,
        }
    }
}

/// What one tick delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub frames: usize,
    pub waiting: usize,
    pub disconnected: usize,
}

type FrameCell = Arc<Mutex<Option<Frame>>>;

struct Reader {
    slot_index: usize,
    cell: FrameCell,
    thread: Option<JoinHandle<()>>,
}

pub struct PreviewPump {
    pool: Arc<CameraPool>,
    transform: PreviewTransform,
    interval: Duration,
    readers: Vec<Reader>,
    stop: Arc<AtomicBool>,
}

impl PreviewPump {
    /// Start one reader per currently healthy slot.
    pub fn start(pool: Arc<CameraPool>, settings: PreviewSettings) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for slot_index in pool.healthy_slots() {
            let cell: FrameCell = Arc::new(Mutex::new(None));
            let thread = thread::Builder::new()
                .name(format!("preview-{}", slot_index))
                .spawn({
                    let pool = Arc::clone(&pool);
                    let cell = Arc::clone(&cell);
                    let stop = Arc::clone(&stop);
                    let backoff = settings.interval;
                    move || read_loop(&pool, slot_index, &cell, &stop, backoff)
                })
                .with_context(|| format!("spawn preview reader for slot {}", slot_index))?;
            readers.push(Reader {
                slot_index,
                cell,
                thread: Some(thread),
            });
        }
        log::info!("PreviewPump: {} reader(s) started", readers.len());
        Ok(Self {
            pool,
            transform: PreviewTransform {
                rotate_180: settings.rotate_180,
            },
            interval: settings.interval,
            readers,
            stop,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh every grid cell once. Never blocks on a camera.
    pub fn tick(&self, exposure: &ExposureCheck, sink: &mut dyn PreviewSink) -> TickStats {
        let mut stats = TickStats::default();
        for slot_index in 0..self.pool.capacity() {
            if !self.pool.is_healthy(slot_index) {
                sink.show_message(slot_index, &disconnected_message(slot_index));
                stats.disconnected += 1;
                continue;
            }
            let ready = self
                .readers
                .iter()
                .find(|reader| reader.slot_index == slot_index)
                .and_then(|reader| take_frame(&reader.cell));
            match ready {
                Some(frame) => {
                    sink.show_frame(slot_index, &self.transform.apply(&frame, exposure));
                    stats.frames += 1;
                }
                None => stats.waiting += 1,
            }
        }
        stats
    }

    /// Stop the readers and wait for them. Each finishes its in-flight read.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for reader in &mut self.readers {
            if let Some(thread) = reader.thread.take() {
                if thread.join().is_err() {
                    log::error!("PreviewPump: reader for slot {} panicked", reader.slot_index);
                }
            }
        }
    }
}

impl Drop for PreviewPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take_frame(cell: &FrameCell) -> Option<Frame> {
    match cell.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

fn read_loop(
    pool: &CameraPool,
    slot_index: usize,
    cell: &FrameCell,
    stop: &AtomicBool,
    backoff: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        match pool.read_background(slot_index) {
            Ok(Some(frame)) => match cell.lock() {
                Ok(mut guard) => *guard = Some(frame),
                Err(poisoned) => *poisoned.into_inner() = Some(frame),
            },
            // A capture owns the slot for now.
            Ok(None) => thread::sleep(backoff),
            Err(err) if err.is_terminal() => {
                log::debug!("PreviewPump: reader exiting: {}", err);
                break;
            }
            Err(err) => {
                log::debug!("PreviewPump: {}", err);
                thread::sleep(backoff);
            }
        }
    }
}

/// A sink that remembers the last thing shown per slot. Used by the daemon's
/// status output in place of a graphical grid.
#[derive(Debug, Default)]
pub struct GridStatus {
    frames: Vec<u64>,
    messages: Vec<Option<String>>,
}

impl GridStatus {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: vec![0; capacity],
            messages: vec![None; capacity],
        }
    }

    pub fn frames_shown(&self, slot_index: usize) -> u64 {
        self.frames.get(slot_index).copied().unwrap_or(0)
    }

    pub fn message(&self, slot_index: usize) -> Option<&str> {
        self.messages.get(slot_index).and_then(|m| m.as_deref())
    }

    fn ensure(&mut self, slot_index: usize) {
        if slot_index >= self.frames.len() {
            self.frames.resize(slot_index + 1, 0);
            self.messages.resize(slot_index + 1, None);
        }
    }
}

impl PreviewSink for GridStatus {
    fn show_frame(&mut self, slot_index: usize, _frame: &Frame) {
        self.ensure(slot_index);
        self.frames[slot_index] += 1;
        self.messages[slot_index] = None;
    }

    fn show_message(&mut self, slot_index: usize, message: &str) {
        self.ensure(slot_index);
        if self.messages[slot_index].as_deref() != Some(message) {
            log::debug!("preview: slot {}: {}", slot_index, message);
            self.messages[slot_index] = Some(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CaptureConfig, SyntheticOpener};
    use crate::frame::PixelLayout;
    use crate::identity::{DeviceDescriptor, SlotMapping};
    use std::time::Instant;

    fn pool(count: u32, capacity: usize, opener: SyntheticOpener) -> Arc<CameraPool> {
        let mapping = SlotMapping::from_descriptors(
            (0..count)
                .map(|i| DeviceDescriptor {
                    enumeration_index: i,
                    stable_id: format!("ID{}", i),
                })
                .collect(),
        );
        let config = CaptureConfig {
            width: 8,
            height: 4,
            fps: 100,
            ..CaptureConfig::default()
        };
        Arc::new(CameraPool::open(&mapping, &config, capacity, &opener))
    }

    #[derive(Default)]
    struct Recorder {
        frames: Vec<(usize, Frame)>,
        messages: Vec<(usize, String)>,
    }

    impl PreviewSink for Recorder {
        fn show_frame(&mut self, slot_index: usize, frame: &Frame) {
            self.frames.push((slot_index, frame.clone()));
        }

        fn show_message(&mut self, slot_index: usize, message: &str) {
            self.messages.push((slot_index, message.to_string()));
        }
    }

    fn tick_until_frames(pump: &PreviewPump, exposure: &ExposureCheck, want: usize) -> Recorder {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut recorder = Recorder::default();
        while recorder.frames.len() < want && Instant::now() < deadline {
            pump.tick(exposure, &mut recorder);
            thread::sleep(Duration::from_millis(5));
        }
        recorder
    }

    #[test]
    fn unhealthy_slots_get_connect_message() {
        let pool = pool(2, 3, SyntheticOpener::new().with_absent([1]));
        let mut pump = PreviewPump::start(pool, PreviewSettings::default()).unwrap();
        let mut recorder = Recorder::default();
        let stats = pump.tick(&ExposureCheck::default(), &mut recorder);
        assert_eq!(stats.disconnected, 2);
        assert!(recorder
            .messages
            .contains(&(1, "Please connect camera 1".to_string())));
        assert!(recorder
            .messages
            .contains(&(2, "Please connect camera 2".to_string())));
        pump.stop();
    }

    #[test]
    fn frames_are_grayscale_previews() {
        let pool = pool(1, 1, SyntheticOpener::new());
        let mut pump = PreviewPump::start(pool, PreviewSettings::default()).unwrap();
        let recorder = tick_until_frames(&pump, &ExposureCheck::default(), 1);
        pump.stop();
        let (slot, frame) = &recorder.frames[0];
        assert_eq!(*slot, 0);
        assert_eq!(frame.layout(), PixelLayout::Gray8);
    }

    #[test]
    fn stalled_slot_does_not_hold_up_tick() {
        let opener = SyntheticOpener::new().with_read_delay(1, Duration::from_millis(500));
        let pool = pool(2, 2, opener);
        let mut pump = PreviewPump::start(pool, PreviewSettings::default()).unwrap();

        let exposure = ExposureCheck::default();
        let start = Instant::now();
        let mut recorder = Recorder::default();
        let stats = pump.tick(&exposure, &mut recorder);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(stats.frames + stats.waiting, 2);

        let recorder = tick_until_frames(&pump, &exposure, 1);
        assert_eq!(recorder.frames[0].0, 0);
        pump.stop();
    }

    #[test]
    fn grid_status_tracks_last_state() {
        let mut grid = GridStatus::new(2);
        grid.show_message(1, "Please connect camera 1");
        grid.show_frame(0, &Frame::gray(1, 1, vec![0]).unwrap());
        assert_eq!(grid.frames_shown(0), 1);
        assert_eq!(grid.message(1), Some("Please connect camera 1"));
        assert_eq!(grid.message(0), None);
    }
}
