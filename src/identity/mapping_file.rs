//! Persisted slot mapping.
//!
//! Written by the resolver, read by the camera pool at startup. A missing or
//! unreadable file is an empty mapping: the rig starts with zero cameras.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{SlotEntry, SlotMapping};

pub const DEFAULT_MAPPING_PATH: &str = "camera_mapping.json";

const MAPPING_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MappingDocument {
    version: u32,
    entries: Vec<SlotEntry>,
}

#[derive(Clone, Debug)]
pub struct MappingFile {
    path: PathBuf,
}

impl MappingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, mapping: &SlotMapping) -> Result<()> {
        let doc = MappingDocument {
            version: MAPPING_FORMAT_VERSION,
            entries: mapping.entries().to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("write mapping file {}", self.path.display()))?;
        log::info!(
            "mapping: wrote {} slot(s) to {}",
            mapping.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the mapping. `Ok(None)` when the file does not exist.
    pub fn load(&self) -> Result<Option<SlotMapping>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow!(
                    "failed to read mapping file {}: {}",
                    self.path.display(),
                    err
                ))
            }
        };
        let doc: MappingDocument = serde_json::from_slice(&raw)
            .map_err(|e| anyhow!("invalid mapping file {}: {}", self.path.display(), e))?;
        if doc.version != MAPPING_FORMAT_VERSION {
            return Err(anyhow!(
                "mapping file {} has unsupported version {}",
                self.path.display(),
                doc.version
            ));
        }
        validate_entries(&doc.entries)?;
        Ok(Some(SlotMapping::from_entries(doc.entries)))
    }

    /// Read the mapping, treating absence or corruption as zero cameras.
    pub fn load_or_empty(&self) -> SlotMapping {
        match self.load() {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                log::warn!(
                    "mapping: {} not found; no cameras mapped",
                    self.path.display()
                );
                SlotMapping::empty()
            }
            Err(err) => {
                log::error!("mapping: {}; no cameras mapped", err);
                SlotMapping::empty()
            }
        }
    }
}

fn validate_entries(entries: &[SlotEntry]) -> Result<()> {
    let mut slots: Vec<usize> = entries.iter().map(|e| e.slot_index).collect();
    slots.sort_unstable();
    if slots.windows(2).any(|w| w[0] == w[1]) {
        return Err(anyhow!("mapping file assigns the same slot twice"));
    }
    let mut indices: Vec<u32> = entries.iter().map(|e| e.enumeration_index).collect();
    indices.sort_unstable();
    if indices.windows(2).any(|w| w[0] == w[1]) {
        return Err(anyhow!("mapping file maps the same device twice"));
    }
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceDescriptor;

    fn sample() -> SlotMapping {
        SlotMapping::from_descriptors(vec![
            DeviceDescriptor {
                enumeration_index: 0,
                stable_id: "B1".to_string(),
            },
            DeviceDescriptor {
                enumeration_index: 1,
                stable_id: "A2".to_string(),
            },
        ])
    }

    #[test]
    fn saved_mapping_reloads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = MappingFile::new(dir.path().join("nested/camera_mapping.json"));
        file.save(&sample())?;
        assert_eq!(file.load()?, Some(sample()));
        assert!(!dir.path().join("nested/camera_mapping.tmp").exists());
        Ok(())
    }

    #[test]
    fn missing_file_is_empty_mapping() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = MappingFile::new(dir.path().join("absent.json"));
        assert_eq!(file.load()?, None);
        assert!(file.load_or_empty().is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_empty_mapping() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("camera_mapping.json");
        fs::write(&path, b"{not json")?;
        let file = MappingFile::new(&path);
        assert!(file.load().is_err());
        assert!(file.load_or_empty().is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_slots_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("camera_mapping.json");
        fs::write(
            &path,
            br#"{"version":1,"entries":[
                {"enumeration_index":0,"slot_index":0,"stable_identifier":"A"},
                {"enumeration_index":1,"slot_index":0,"stable_identifier":"B"}]}"#,
        )?;
        assert!(MappingFile::new(&path).load().is_err());
        Ok(())
    }
}
