//! # Sweep DAQ Core Library
//!
//! Accumulation and persistence core for swept measurements: readings arrive
//! one point at a time, build up into lines, lines into surfaces and surfaces
//! into volumes, and everything lands in a hierarchical storage file organised
//! by nested experiments.
//!
//! ## Crate Structure
//!
//! - **`data`**: labelled [`data::Axis`] / [`data::Dataset`] buffers and the
//!   [`data::LineContainer`], [`data::SurfaceContainer`] and
//!   [`data::VolumeContainer`] accumulators with their change notifications and
//!   auto-ingest links.
//! - **`experiment`**: the [`experiment::ExperimentContext`] stack of nested
//!   scopes, each owning a storage group and a list of components to persist
//!   when it exits.
//! - **`storage`**: the [`storage::StorageBackend`] group/array/attribute model
//!   with a JSON-snapshot backend and an HDF5 backend (feature `storage_hdf5`).
//! - **`config`**: [`config::SweepConfig`] loaded with Figment from TOML and
//!   `SWEEP_DAQ_` environment variables.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: the crate-wide [`DaqError`] enum.
//!
//! ## Example
//!
//! ```
//! use sweep_daq::data::{shared, Accumulator, Axis, LineContainer, SurfaceContainer};
//!
//! # fn main() -> sweep_daq::AppResult<()> {
//! let freq = Axis::from_values("freq", "Hz", &[1.0, 2.0, 3.0])?;
//! let power = Axis::from_values("power", "dBm", &[-10.0, 0.0])?;
//!
//! let line = shared(LineContainer::new("trace", &freq, "mag", "dB", "")?);
//! let map = SurfaceContainer::linked("map", &power, &line)?;
//!
//! for _ in 0..2 {
//!     line.borrow_mut().reset();
//!     for value in [0.1, 0.2, 0.3] {
//!         line.borrow_mut().append(value, None)?;
//!     }
//! }
//! assert!(map.borrow().is_full());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod storage;

pub use error::{AppResult, DaqError};
