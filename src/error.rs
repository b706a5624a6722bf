//! Failure values for the acquisition path.
//!
//! Each failure is scoped to what it affects: an enumeration pass, one slot's
//! open, one slot's read, or the capture destination. None of them abort work
//! on other slots.

use std::fmt;
use std::path::PathBuf;

/// Device listing was unavailable. Resolution degrades to an empty mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnumerationError {
    /// The listing command could not be started or exited unsuccessfully.
    Command { program: String, reason: String },
    /// The device tree could not be read.
    Io(String),
}

impl fmt::Display for EnumerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { program, reason } => {
                write!(f, "device listing command '{}' failed: {}", program, reason)
            }
            Self::Io(reason) => write!(f, "device listing failed: {}", reason),
        }
    }
}

impl std::error::Error for EnumerationError {}

/// A slot's device could not be opened or configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenFailure {
    NotPresent { enumeration_index: u32 },
    Busy { enumeration_index: u32 },
    Rejected { enumeration_index: u32, reason: String },
}

impl OpenFailure {
    pub fn enumeration_index(&self) -> u32 {
        match self {
            Self::NotPresent { enumeration_index }
            | Self::Busy { enumeration_index }
            | Self::Rejected {
                enumeration_index, ..
            } => *enumeration_index,
        }
    }
}

impl fmt::Display for OpenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent { enumeration_index } => {
                write!(f, "device {} not present", enumeration_index)
            }
            Self::Busy { enumeration_index } => write!(f, "device {} busy", enumeration_index),
            Self::Rejected {
                enumeration_index,
                reason,
            } => write!(
                f,
                "device {} rejected configuration: {}",
                enumeration_index, reason
            ),
        }
    }
}

impl std::error::Error for OpenFailure {}

/// One read on one slot failed. Health is not changed by a read failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadFailure {
    NoSuchSlot(usize),
    /// The slot never opened.
    NotOpened(usize),
    /// The slot's handle was released.
    Released(usize),
    Device { slot: usize, reason: String },
}

impl ReadFailure {
    /// True when no later read on this slot can succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoSuchSlot(_) | Self::NotOpened(_) | Self::Released(_)
        )
    }
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchSlot(slot) => write!(f, "slot {} does not exist", slot),
            Self::NotOpened(slot) => write!(f, "slot {} has no opened camera", slot),
            Self::Released(slot) => write!(f, "slot {} was released", slot),
            Self::Device { slot, reason } => write!(f, "slot {} read failed: {}", slot, reason),
        }
    }
}

impl std::error::Error for ReadFailure {}

/// The capture destination cannot accept frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceFailure {
    NoDestination,
    MissingDirectory(PathBuf),
    Unwritable { path: PathBuf, reason: String },
}

impl fmt::Display for PersistenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDestination => write!(f, "no specimen directory selected"),
            Self::MissingDirectory(path) => {
                write!(f, "specimen directory {} does not exist", path.display())
            }
            Self::Unwritable { path, reason } => {
                write!(f, "cannot write {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for PersistenceFailure {}

/// A sensor line did not have the expected `key: value, ...` shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorParseError {
    pub line: String,
    pub reason: &'static str,
}

impl fmt::Display for SensorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unparsable sensor line '{}': {}", self.line, self.reason)
    }
}

impl std::error::Error for SensorParseError {}
