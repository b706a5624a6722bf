//! Specimen folder layout.
//!
//! ```text
//! <specimen>/
//!   101/101_1.tiff, 101_2.tiff, ...   slot 0
//!   102/...                           slot 1
//!   Results/environmental_data.csv
//! ```
//!
//! Image numbering follows the file count of each slot directory at save
//! time, so numbering is independent per slot and survives restarts.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::capture::CaptureSink;
use crate::error::PersistenceFailure;
use crate::frame::{Frame, PixelLayout};
use crate::sensor::SensorReading;

/// Slot 0 is saved under directory `101`.
pub const SLOT_DIR_OFFSET: usize = 101;
pub const RESULTS_DIR: &str = "Results";
pub const ENVIRONMENT_CSV: &str = "environmental_data.csv";
pub const ENVIRONMENT_HEADER: &str =
    "Serial Number,Date,Time,Temperature,Relative Humidity,Wind Speed";

/// Where the operator wants this capture to go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecimenTarget {
    /// Create the folder layout for a new specimen.
    New(PathBuf),
    /// Continue an existing specimen's layout.
    Existing(PathBuf),
}

impl SpecimenTarget {
    pub fn path(&self) -> &Path {
        match self {
            SpecimenTarget::New(path) | SpecimenTarget::Existing(path) => path,
        }
    }
}

fn unwritable(path: &Path, err: impl std::fmt::Display) -> PersistenceFailure {
    PersistenceFailure::Unwritable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

pub fn slot_dir_name(slot_index: usize) -> String {
    (SLOT_DIR_OFFSET + slot_index).to_string()
}

#[derive(Clone, Debug)]
pub struct SpecimenStore {
    root: PathBuf,
    slot_count: usize,
}

impl SpecimenStore {
    /// Open a store for `target`.
    ///
    /// A new specimen gets every slot directory, `Results/` and the CSV
    /// header. An existing specimen must already exist; slot directories it
    /// lacks are returned so the operator can be warned. They are recreated
    /// when a frame is saved.
    pub fn prepare(
        target: &SpecimenTarget,
        slot_count: usize,
    ) -> Result<(Self, Vec<String>), PersistenceFailure> {
        let store = Self {
            root: target.path().to_path_buf(),
            slot_count,
        };
        let missing = match target {
            SpecimenTarget::New(root) => {
                for slot in 0..slot_count {
                    let dir = store.slot_dir(slot);
                    fs::create_dir_all(&dir).map_err(|e| unwritable(&dir, e))?;
                }
                log::info!(
                    "storage: created {} slot folder(s) under {}",
                    slot_count,
                    root.display()
                );
                Vec::new()
            }
            SpecimenTarget::Existing(_) => {
                store.ensure_ready()?;
                let missing = store.missing_slot_dirs();
                if !missing.is_empty() {
                    log::warn!("storage: missing slot folder(s): {}", missing.join(", "));
                }
                missing
            }
        };
        store.ensure_environment_log()?;
        Ok((store, missing))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, slot_index: usize) -> PathBuf {
        self.root.join(slot_dir_name(slot_index))
    }

    pub fn environment_log_path(&self) -> PathBuf {
        self.root.join(RESULTS_DIR).join(ENVIRONMENT_CSV)
    }

    /// Fail before any frame is read when the destination is gone.
    pub fn ensure_ready(&self) -> Result<(), PersistenceFailure> {
        if !self.root.is_dir() {
            return Err(PersistenceFailure::MissingDirectory(self.root.clone()));
        }
        let results = self.root.join(RESULTS_DIR);
        fs::create_dir_all(&results).map_err(|e| unwritable(&results, e))
    }

    fn missing_slot_dirs(&self) -> Vec<String> {
        (0..self.slot_count)
            .filter(|&slot| !self.slot_dir(slot).is_dir())
            .map(slot_dir_name)
            .collect()
    }

    fn ensure_environment_log(&self) -> Result<(), PersistenceFailure> {
        let path = self.environment_log_path();
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| unwritable(parent, e))?;
        }
        fs::write(&path, format!("{}\n", ENVIRONMENT_HEADER)).map_err(|e| unwritable(&path, e))
    }

    /// Index the next image in `slot_index`'s directory will get.
    pub fn next_file_index(&self, slot_index: usize) -> Result<usize, PersistenceFailure> {
        let dir = self.slot_dir(slot_index);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(1),
            Err(err) => return Err(unwritable(&dir, err)),
        };
        let mut files = 0;
        for entry in entries {
            let entry = entry.map_err(|e| unwritable(&dir, e))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files += 1;
            }
        }
        Ok(files + 1)
    }

    /// Append one row; the serial number is the file's line count before it.
    pub fn append_environment(&self, reading: &SensorReading) -> Result<usize, PersistenceFailure> {
        self.ensure_environment_log()?;
        let path = self.environment_log_path();
        let file = fs::File::open(&path).map_err(|e| unwritable(&path, e))?;
        let serial = BufReader::new(file).lines().count();

        let now = Local::now();
        let row = format!(
            "{},{},{},{},{},{}\n",
            serial,
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S"),
            reading.temperature_text(),
            reading.humidity_text(),
            reading.wind_speed_text()
        );
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| unwritable(&path, e))?;
        file.write_all(row.as_bytes())
            .map_err(|e| unwritable(&path, e))?;
        log::info!("storage: environment row {} ({})", serial, reading);
        Ok(serial)
    }
}

impl CaptureSink for SpecimenStore {
    fn save_frame(
        &mut self,
        slot_index: usize,
        frame: &Frame,
    ) -> Result<PathBuf, PersistenceFailure> {
        let dir = self.slot_dir(slot_index);
        fs::create_dir_all(&dir).map_err(|e| unwritable(&dir, e))?;

        let name = slot_dir_name(slot_index);
        let mut index = self.next_file_index(slot_index)?;
        // Never overwrite an earlier capture when files were removed by hand.
        let mut path = dir.join(format!("{}_{}.tiff", name, index));
        while path.exists() {
            index += 1;
            path = dir.join(format!("{}_{}.tiff", name, index));
        }

        write_tiff(&path, frame)?;
        log::info!("storage: saved {}", path.display());
        Ok(path)
    }
}

fn write_tiff(path: &Path, frame: &Frame) -> Result<(), PersistenceFailure> {
    let color = match frame.layout() {
        PixelLayout::Gray8 => image::ExtendedColorType::L8,
        PixelLayout::Rgb8 => image::ExtendedColorType::Rgb8,
    };
    image::save_buffer_with_format(
        path,
        frame.as_bytes(),
        frame.width(),
        frame.height(),
        color,
        image::ImageFormat::Tiff,
    )
    .map_err(|e| unwritable(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame() -> Frame {
        Frame::gray(4, 2, (0..8).collect()).unwrap()
    }

    #[test]
    fn new_specimen_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("specimen");
        let (store, missing) = SpecimenStore::prepare(&SpecimenTarget::New(root.clone()), 3).unwrap();
        assert!(missing.is_empty());
        for name in ["101", "102", "103", "Results"] {
            assert!(root.join(name).is_dir(), "{} missing", name);
        }
        let csv = fs::read_to_string(store.environment_log_path()).unwrap();
        assert_eq!(csv, format!("{}\n", ENVIRONMENT_HEADER));
    }

    #[test]
    fn existing_specimen_reports_missing_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("101")).unwrap();
        let target = SpecimenTarget::Existing(dir.path().to_path_buf());
        let (_, missing) = SpecimenStore::prepare(&target, 3).unwrap();
        assert_eq!(missing, vec!["102".to_string(), "103".to_string()]);
    }

    #[test]
    fn existing_specimen_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let err = SpecimenStore::prepare(&SpecimenTarget::Existing(gone.clone()), 1).unwrap_err();
        assert_eq!(err, PersistenceFailure::MissingDirectory(gone));
    }

    #[test]
    fn numbering_is_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) =
            SpecimenStore::prepare(&SpecimenTarget::New(dir.path().to_path_buf()), 2).unwrap();

        for _ in 0..3 {
            store.save_frame(1, &gray_frame()).unwrap();
        }
        let first = store.save_frame(0, &gray_frame()).unwrap();
        let second = store.save_frame(0, &gray_frame()).unwrap();
        assert_eq!(first, dir.path().join("101").join("101_1.tiff"));
        assert_eq!(second, dir.path().join("101").join("101_2.tiff"));

        let decoded = image::open(&first).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.into_raw(), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn environment_rows_are_serial_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) =
            SpecimenStore::prepare(&SpecimenTarget::New(dir.path().to_path_buf()), 1).unwrap();
        let reading = SensorReading {
            temperature: Some("21.5".to_string()),
            humidity: None,
            wind_speed: Some("0".to_string()),
        };
        assert_eq!(store.append_environment(&reading).unwrap(), 1);
        assert_eq!(store.append_environment(&reading).unwrap(), 2);

        let csv = fs::read_to_string(store.environment_log_path()).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows.len(), 3);
        let fields: Vec<&str> = rows[2].split(',').collect();
        assert_eq!(fields[0], "2");
        assert_eq!(fields[1].len(), "2026-01-01".len());
        assert_eq!(&fields[3..], &["21.5", "--", "0"]);
    }
}
