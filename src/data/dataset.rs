//! Labelled N-D numeric buffers (rank 1 to 3).

use super::meta::Metadata;
use super::persist;
use crate::error::{AppResult, DaqError};
use crate::storage::{NodePath, StorageBackend};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn};
use uuid::Uuid;

/// Highest rank a [`Dataset`] may have.
pub const MAX_RANK: usize = 3;

/// Fixed-shape `f64` buffer with label, unit and description.
///
/// NaN marks "not yet written". The shape is fixed at construction; values can
/// be overwritten through [`Dataset::values_mut`] but the buffer never resizes.
#[derive(Debug)]
pub struct Dataset {
    meta: Metadata,
    values: ArrayD<f64>,
}

impl Dataset {
    /// Allocate a NaN-filled dataset of `shape`.
    ///
    /// Fails with [`DaqError::InvalidShape`] if the rank is outside 1..=3 or any
    /// dimension is zero.
    pub fn create(
        shape: &[usize],
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> AppResult<Self> {
        check_shape(shape)?;
        Ok(Self {
            meta: Metadata::new(label, unit, description),
            values: ArrayD::from_elem(IxDyn(shape), f64::NAN),
        })
    }

    /// Wrap existing values. The same shape rules as [`Dataset::create`] apply.
    pub fn from_array(
        values: ArrayD<f64>,
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> AppResult<Self> {
        check_shape(values.shape())?;
        Ok(Self {
            meta: Metadata::new(label, unit, description),
            values,
        })
    }

    /// NaN-filled dataset carrying `meta`, for shapes already validated by the caller.
    pub(crate) fn with_meta(shape: &[usize], meta: Metadata) -> AppResult<Self> {
        check_shape(shape)?;
        Ok(Self {
            meta,
            values: ArrayD::from_elem(IxDyn(shape), f64::NAN),
        })
    }

    /// Independent deep copy: same text metadata, new identity.
    pub fn copy(&self) -> Self {
        Self {
            meta: self.meta.renewed(),
            values: self.values.clone(),
        }
    }

    /// Replace label, unit and description, keeping the identity.
    pub fn with_meta_text(
        mut self,
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.meta.set_label(label);
        self.meta.set_unit(unit);
        self.meta.set_description(description);
        self
    }

    /// Metadata of this dataset.
    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    /// Short name of the quantity.
    pub fn label(&self) -> &str {
        self.meta.label()
    }

    /// Physical unit.
    pub fn unit(&self) -> &str {
        self.meta.unit()
    }

    /// Free-form description.
    pub fn description(&self) -> &str {
        self.meta.description()
    }

    /// Stable identity.
    pub fn id(&self) -> Uuid {
        self.meta.id()
    }

    /// `label [unit]`.
    pub fn axis_label(&self) -> String {
        self.meta.axis_label()
    }

    /// Number of dimensions (1..=3).
    pub fn rank(&self) -> usize {
        self.values.ndim()
    }

    /// Length of each dimension.
    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// Read-only view of the values.
    pub fn values(&self) -> ArrayViewD<'_, f64> {
        self.values.view()
    }

    /// Mutable view of the values. The shape cannot change through it.
    pub fn values_mut(&mut self) -> ArrayViewMutD<'_, f64> {
        self.values.view_mut()
    }

    /// Mark every element as not yet written.
    pub fn fill_nan(&mut self) {
        self.values.fill(f64::NAN);
    }

    /// Number of elements that have been written (are not NaN).
    pub fn written(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Store this dataset inside `group`.
    ///
    /// If an entry with this identity already exists there, its contents are
    /// overwritten in place ([`DaqError::ShapeMismatch`] if the stored shape
    /// differs). Otherwise a new entry named after the label is created and the
    /// descriptive attributes are written. Persisting unchanged data twice leaves
    /// the stored bytes identical.
    pub fn persist(
        &self,
        backend: &mut dyn StorageBackend,
        group: &NodePath,
    ) -> AppResult<NodePath> {
        persist::persist_array(backend, group, &self.meta, self.values.view())
    }
}

fn check_shape(shape: &[usize]) -> AppResult<()> {
    if shape.is_empty() || shape.len() > MAX_RANK {
        return Err(DaqError::InvalidShape(format!(
            "rank must be between 1 and {MAX_RANK}, got {}",
            shape.len()
        )));
    }
    if let Some(axis) = shape.iter().position(|&len| len == 0) {
        return Err(DaqError::InvalidShape(format!(
            "dimension {axis} of {shape:?} has zero length"
        )));
    }
    Ok(())
}
