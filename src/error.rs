//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, shared by the data
//! containers, the storage backends and the experiment stack. Using the `thiserror`
//! crate, it provides a centralized and consistent way to report failures with the
//! `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **Geometry**: `InvalidSourceKind`, `InvalidShape`, `DimensionMismatch` and
//!   `ShapeMismatch` report rank or dimension violations, detected before any buffer
//!   is touched.
//! - **Accumulation**: `ContainerFull` is returned by `append`/`ingest_*` once every
//!   slot along the accumulation dimension has been written. `SubscriberFailed` wraps
//!   an error raised by a subscriber, typically a linked consumer that was already full.
//! - **Experiment stack**: `EmptyStack`, `ComponentBusy` and `FlushFailed`.
//! - **Storage**: `StorageUnavailable` when a location cannot be created, `Storage`
//!   for any other backend failure, `FeatureNotEnabled` when a backend was not
//!   compiled in.
//! - **Configuration**: `Config` wraps `figment` extraction errors, `Configuration`
//!   reports semantic validation failures.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for sweep accumulation and experiment storage.
///
/// Every variant is raised synchronously by the call that detects it. Nothing is
/// retried internally; the experiment script decides whether to abort or recover.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Input of a kind the constructor or ingest call cannot accept.
    #[error("Unsupported source: {0}")]
    InvalidSourceKind(String),

    /// Rank outside 1..=3 or a zero-length dimension.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Supplied buffer does not match the geometry of the receiving container.
    #[error("Dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        /// Shape required by the receiver.
        expected: Vec<usize>,
        /// Shape that was supplied.
        found: Vec<usize>,
    },

    /// An existing storage entry has a different shape than the data being written.
    #[error("Stored entry '{path}' has shape {found:?}, cannot overwrite with {expected:?}")]
    ShapeMismatch {
        /// Storage path of the conflicting entry.
        path: String,
        /// Shape of the in-memory data.
        expected: Vec<usize>,
        /// Shape found in storage.
        found: Vec<usize>,
    },

    /// Append or ingest on a container that is already full.
    #[error("The data container '{name}' is already full")]
    ContainerFull {
        /// Name of the full container.
        name: String,
    },

    /// A subscriber rejected a notification. The emitter's own update was committed.
    #[error("Subscriber rejected notification: {0}")]
    SubscriberFailed(#[source] Box<DaqError>),

    /// Experiment stack operation with no active scope.
    #[error("No experiment scope is active")]
    EmptyStack,

    /// A registered component was borrowed elsewhere while the stack tried to flush it.
    #[error("Component is busy: {0}")]
    ComponentBusy(String),

    /// One or more components failed to persist while a scope was exiting.
    #[error("Failed to flush {} component(s) on scope exit", .0.len())]
    FlushFailed(Vec<DaqError>),

    /// The backend cannot create the requested location.
    #[error("Storage unavailable at '{}': {reason}", path.display())]
    StorageUnavailable {
        /// Location that could not be created.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Any other backend failure (missing node, decode error, HDF5 error).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration file or environment could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A backend or format that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Wraps filesystem errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl From<serde_json::Error> for DaqError {
    fn from(value: serde_json::Error) -> Self {
        DaqError::Storage(format!("JSON snapshot: {value}"))
    }
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for DaqError {
    fn from(value: hdf5::Error) -> Self {
        DaqError::Storage(value.to_string())
    }
}

impl DaqError {
    /// Shorthand for a [`DaqError::DimensionMismatch`].
    pub(crate) fn dimension_mismatch(expected: &[usize], found: &[usize]) -> Self {
        DaqError::DimensionMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Whether the caller can reasonably recover and continue the experiment.
    ///
    /// Geometry and accumulation errors leave the container in its pre-call state,
    /// so the script may reset or skip. Storage and configuration errors are permanent
    /// for the current run.
    pub fn can_recover(&self) -> bool {
        match self {
            DaqError::InvalidSourceKind(_)
            | DaqError::InvalidShape(_)
            | DaqError::DimensionMismatch { .. }
            | DaqError::ContainerFull { .. }
            | DaqError::SubscriberFailed(_)
            | DaqError::ComponentBusy(_) => true,
            DaqError::ShapeMismatch { .. }
            | DaqError::EmptyStack
            | DaqError::FlushFailed(_)
            | DaqError::StorageUnavailable { .. }
            | DaqError::Storage(_)
            | DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::FeatureNotEnabled(_)
            | DaqError::Io(_) => false,
        }
    }
}
