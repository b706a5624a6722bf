//! Specimen Rig
//!
//! Drives a multi-camera specimen-imaging rig: up to twelve USB cameras, each
//! pinned to a stable slot, a live preview grid, and "capture now" stills that
//! land in a per-specimen folder tree next to environmental sensor readings.
//!
//! # Acquisition path
//!
//! 1. `identity`: enumerate devices, extract a port-derived identifier, sort
//!    by it to assign slots, persist the mapping file.
//! 2. `camera`: open one device per mapped slot concurrently; slots that fail
//!    to open stay unhealthy for the life of the pool.
//! 3. `capture`: read one frame from every healthy slot concurrently and hand
//!    the red plane of each to the specimen store.
//!
//! A failure on one slot never aborts work on another.
//!
//! # Module Structure
//!
//! - `frame`, `transform`: owned pixel buffers and preview transforms
//! - `preview`: per-slot readers feeding a non-blocking grid refresh
//! - `storage`, `sensor`: specimen folders and the environment log
//! - `rig`, `operator`, `config`, `state`, `ui`: the daemon's moving parts

pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod identity;
pub mod operator;
pub mod preview;
pub mod rig;
pub mod sensor;
pub mod state;
pub mod storage;
pub mod transform;
pub mod ui;

pub use camera::{CameraPool, CaptureConfig, DeviceOpener, PoolSummary, SyntheticOpener};
pub use capture::{CaptureCoordinator, CaptureReport, CaptureResult, SlotOutcome};
pub use config::RigConfig;
pub use error::{EnumerationError, OpenFailure, PersistenceFailure, ReadFailure};
pub use frame::{ChannelPolicy, Frame, PixelLayout};
pub use identity::{DeviceIdentityResolver, MappingFile, SlotMapping};
pub use operator::OperatorCommand;
pub use rig::{CaptureOutcome, Rig, RigStatus};
pub use storage::{SpecimenStore, SpecimenTarget, SLOT_DIR_OFFSET};

/// Most cameras the rig can drive; also the default camera count.
pub const MAX_CAMERAS: usize = 12;
