use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use specimen_rig::camera::{CameraPool, CaptureConfig, SyntheticOpener};
use specimen_rig::capture::{AbsenceReason, CaptureCoordinator, SlotOutcome};
use specimen_rig::identity::{DeviceIdentityResolver, MappingFile, PnpInstanceExtractor, StaticLister};
use specimen_rig::preview::{PreviewPump, PreviewSettings};
use specimen_rig::storage::{SpecimenStore, SpecimenTarget, ENVIRONMENT_HEADER};
use specimen_rig::sensor::SensorReading;
use specimen_rig::SlotMapping;

fn small_config() -> CaptureConfig {
    CaptureConfig {
        width: 16,
        height: 12,
        fps: 200,
        ..CaptureConfig::default()
    }
}

fn mapped_rig(dir: &Path, count: usize) -> SlotMapping {
    let file = MappingFile::new(dir.join("camera_mapping.json"));
    DeviceIdentityResolver::new(
        Box::new(StaticLister::synthetic_rig(count)),
        Box::new(PnpInstanceExtractor),
    )
    .resolve_into(&file)
    .expect("write mapping");
    file.load_or_empty()
}

#[test]
fn capture_all_marks_unhealthy_slot_absent() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = mapped_rig(dir.path(), 5);
    let dead_slot = 3;
    let dead_index = mapping
        .entry_for_slot(dead_slot)
        .map(|e| e.enumeration_index)
        .unwrap();

    let opener = SyntheticOpener::new().with_absent([dead_index]);
    let pool = CameraPool::open(&mapping, &small_config(), 5, &opener);
    assert_eq!(pool.summary().to_string(), "4 of 5 cameras ready");

    let result = CaptureCoordinator::default().capture_all(&pool);
    for (slot, outcome) in result.iter() {
        if slot == dead_slot {
            assert_eq!(outcome, &SlotOutcome::Absent(AbsenceReason::NotOpened));
        } else {
            assert!(outcome.is_captured(), "slot {} should be captured", slot);
        }
    }
}

#[test]
fn two_of_five_failing_opens_still_returns() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = mapped_rig(dir.path(), 5);
    let opener = SyntheticOpener::from_uri("stub://rig?absent=0&busy=4").unwrap();
    let pool = CameraPool::open(&mapping, &small_config(), 12, &opener);
    let summary = pool.summary();
    assert_eq!((summary.healthy_count, summary.total_count), (3, 5));
}

#[test]
fn missing_mapping_file_opens_empty_pool() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = MappingFile::new(dir.path().join("absent.json")).load_or_empty();
    let pool = CameraPool::open(&mapping, &small_config(), 12, &SyntheticOpener::new());
    let summary = pool.summary();
    assert_eq!((summary.healthy_count, summary.total_count), (0, 0));

    let result = CaptureCoordinator::default().capture_all(&pool);
    assert!(result.captured_slots().is_empty());
}

#[test]
fn captures_number_per_slot_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let specimen = dir.path().join("specimen-42");
    let mapping = mapped_rig(dir.path(), 3);
    let coordinator = CaptureCoordinator::default();

    // First run creates the specimen.
    {
        let pool = CameraPool::open(&mapping, &small_config(), 3, &SyntheticOpener::new());
        let (mut store, _) = SpecimenStore::prepare(&SpecimenTarget::New(specimen.clone()), 3).unwrap();
        let report = coordinator.persist(&coordinator.capture_all(&pool), &mut store);
        assert_eq!(report.saved.len(), 3);
        store.append_environment(&SensorReading::default()).unwrap();
    }

    // A second process continues it, with slot 2 now unplugged.
    let unplugged = mapping.entry_for_slot(2).map(|e| e.enumeration_index).unwrap();
    let pool = CameraPool::open(
        &mapping,
        &small_config(),
        3,
        &SyntheticOpener::new().with_absent([unplugged]),
    );
    let (mut store, missing) =
        SpecimenStore::prepare(&SpecimenTarget::Existing(specimen.clone()), 3).unwrap();
    assert!(missing.is_empty());
    let report = coordinator.persist(&coordinator.capture_all(&pool), &mut store);
    assert_eq!(report.absent, vec![2]);
    assert_eq!(store.append_environment(&SensorReading::default()).unwrap(), 2);

    assert!(specimen.join("101/101_2.tiff").is_file());
    assert!(specimen.join("102/102_2.tiff").is_file());
    assert!(specimen.join("103/103_1.tiff").is_file());
    assert!(!specimen.join("103/103_2.tiff").exists());

    let csv = std::fs::read_to_string(specimen.join("Results/environmental_data.csv")).unwrap();
    assert!(csv.starts_with(ENVIRONMENT_HEADER));
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn capture_is_not_starved_by_running_preview() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = mapped_rig(dir.path(), 4);
    // One frame per 100 ms: reading all four in turn would take ~400 ms.
    let config = CaptureConfig {
        fps: 10,
        ..small_config()
    };
    let pool = Arc::new(CameraPool::open(&mapping, &config, 4, &SyntheticOpener::new()));
    let mut pump = PreviewPump::start(Arc::clone(&pool), PreviewSettings::default()).unwrap();
    std::thread::sleep(Duration::from_millis(250));

    let coordinator = CaptureCoordinator::default();
    let mut worst = Duration::ZERO;
    for _ in 0..5 {
        let start = Instant::now();
        let result = coordinator.capture_all(&pool);
        worst = worst.max(start.elapsed());
        assert_eq!(result.captured_slots(), vec![0, 1, 2, 3]);
    }
    pump.stop();

    // At most one in-flight preview read plus the capture's own read.
    assert!(worst < Duration::from_millis(320), "capture_all took {:?}", worst);
}
