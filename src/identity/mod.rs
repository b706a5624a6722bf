//! Device identity resolution.
//!
//! The OS hands out camera indices in a different order on every start. This
//! module maps each enumerated device to a stable slot:
//!
//! 1. a `DeviceLister` enumerates camera-class devices as raw descriptor strings,
//! 2. an `IdentifierExtractor` pulls a port-derived identifier out of each one,
//! 3. devices are sorted by identifier; the sorted position is the slot.
//!
//! Devices without an extractable identifier are logged and get no slot.
//! Listing failure yields an empty mapping, never an error.

mod extract;
mod listers;
mod mapping_file;

pub use extract::{PnpInstanceExtractor, UsbPortExtractor};
pub(crate) use listers::default_keywords;
pub use listers::{CommandLister, StaticLister, SysfsLister};
pub use mapping_file::{MappingFile, DEFAULT_MAPPING_PATH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EnumerationError;

/// One device as reported by a lister.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedDevice {
    /// Index the capture backend opens this device with. Volatile across runs.
    pub enumeration_index: u32,
    /// Platform descriptor string the identifier is extracted from.
    pub descriptor: String,
}

/// Enumerates camera-class devices on the host.
pub trait DeviceLister: Send + Sync {
    fn list(&self) -> Result<Vec<ListedDevice>, EnumerationError>;
}

/// Extracts a stable, comparable identifier from a descriptor string.
pub trait IdentifierExtractor: Send + Sync {
    fn extract(&self, descriptor: &str) -> Option<String>;
}

/// A device that survived identifier extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub enumeration_index: u32,
    pub stable_id: String,
}

/// One row of the slot mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub enumeration_index: u32,
    pub slot_index: usize,
    #[serde(rename = "stable_identifier")]
    pub stable_id: String,
}

/// Ordered enumeration-index → slot assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotMapping {
    entries: Vec<SlotEntry>,
}

impl SlotMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assign slots by ascending identifier.
    ///
    /// Ties on identifier keep enumeration order, so the assignment is a pure
    /// function of the (index, identifier) set.
    pub fn from_descriptors(mut descriptors: Vec<DeviceDescriptor>) -> Self {
        descriptors.sort_by(|a, b| {
            a.stable_id
                .cmp(&b.stable_id)
                .then(a.enumeration_index.cmp(&b.enumeration_index))
        });
        let entries = descriptors
            .into_iter()
            .enumerate()
            .map(|(slot_index, d)| SlotEntry {
                enumeration_index: d.enumeration_index,
                slot_index,
                stable_id: d.stable_id,
            })
            .collect();
        Self { entries }
    }

    /// Rebuild from persisted rows. Rows are kept in slot order.
    pub(crate) fn from_entries(mut entries: Vec<SlotEntry>) -> Self {
        entries.sort_by_key(|e| e.slot_index);
        Self { entries }
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_for_slot(&self, slot_index: usize) -> Option<&SlotEntry> {
        self.entries.iter().find(|e| e.slot_index == slot_index)
    }
}

pub struct DeviceIdentityResolver {
    lister: Box<dyn DeviceLister>,
    extractor: Box<dyn IdentifierExtractor>,
}

impl DeviceIdentityResolver {
    pub fn new(lister: Box<dyn DeviceLister>, extractor: Box<dyn IdentifierExtractor>) -> Self {
        Self { lister, extractor }
    }

    /// Enumerate devices and keep those with an extractable identifier.
    pub fn enumerate(&self) -> Vec<DeviceDescriptor> {
        let listed = match self.lister.list() {
            Ok(listed) => listed,
            Err(err) => {
                log::warn!("identity: {}; resolving zero cameras", err);
                return Vec::new();
            }
        };
        listed
            .into_iter()
            .filter_map(|device| match self.extractor.extract(&device.descriptor) {
                Some(stable_id) => Some(DeviceDescriptor {
                    enumeration_index: device.enumeration_index,
                    stable_id,
                }),
                None => {
                    log::warn!(
                        "identity: no identifier in descriptor of device {}: {}",
                        device.enumeration_index,
                        device.descriptor.trim()
                    );
                    None
                }
            })
            .collect()
    }

    /// Resolve the current device set into a slot mapping.
    pub fn resolve(&self) -> SlotMapping {
        let mapping = SlotMapping::from_descriptors(self.enumerate());
        for entry in mapping.iter() {
            log::debug!(
                "identity: device {} -> slot {} ({})",
                entry.enumeration_index,
                entry.slot_index,
                entry.stable_id
            );
        }
        log::info!("identity: resolved {} camera(s)", mapping.len());
        mapping
    }

    /// Resolve and persist the mapping for later runs.
    pub fn resolve_into(&self, file: &MappingFile) -> Result<SlotMapping> {
        let mapping = self.resolve();
        file.save(&mapping)?;
        Ok(mapping)
    }
}
