//! Fixed-length 1-D coordinate buffers.

use super::dataset::Dataset;
use super::meta::Metadata;
use super::persist;
use crate::error::{AppResult, DaqError};
use crate::storage::{NodePath, StorageBackend};
use ndarray::{Array1, ArrayView1, ArrayViewMut1, Ix1};
use uuid::Uuid;

/// Where the values of a new [`Axis`] come from.
#[derive(Debug, Clone, Copy)]
pub enum AxisSource<'a> {
    /// Deep copy of another axis, including its metadata.
    Axis(&'a Axis),
    /// Deep copy of a rank-1 dataset, including its metadata.
    Dataset(&'a Dataset),
    /// The given coordinates.
    Values(&'a [f64]),
    /// `n` NaN-filled points.
    Points(usize),
}

/// Immutable-length 1-D coordinate or measurement buffer.
#[derive(Debug)]
pub struct Axis {
    meta: Metadata,
    values: Array1<f64>,
}

impl Axis {
    /// Build an axis from `source`.
    ///
    /// Copies get a new identity. Fails with [`DaqError::InvalidSourceKind`] for a
    /// dataset that is not rank 1 and with [`DaqError::InvalidShape`] for an empty
    /// axis.
    pub fn create(source: AxisSource<'_>) -> AppResult<Self> {
        let (meta, values) = match source {
            AxisSource::Axis(axis) => (axis.meta.renewed(), axis.values.clone()),
            AxisSource::Dataset(dataset) => {
                let values = dataset
                    .values()
                    .into_dimensionality::<Ix1>()
                    .map_err(|_| {
                        DaqError::InvalidSourceKind(format!(
                            "axis needs a rank-1 dataset, '{}' has rank {}",
                            dataset.label(),
                            dataset.rank()
                        ))
                    })?
                    .to_owned();
                (dataset.meta().renewed(), values)
            }
            AxisSource::Values(values) => {
                (Metadata::new("", "", ""), Array1::from(values.to_vec()))
            }
            AxisSource::Points(n) => (Metadata::new("", "", ""), Array1::from_elem(n, f64::NAN)),
        };
        if values.is_empty() {
            return Err(DaqError::InvalidShape("an axis needs at least one point".into()));
        }
        Ok(Self { meta, values })
    }

    /// Shorthand for `Axis::create(AxisSource::Values(values))` with a label and unit.
    pub fn from_values(
        label: impl Into<String>,
        unit: impl Into<String>,
        values: &[f64],
    ) -> AppResult<Self> {
        Ok(Self::create(AxisSource::Values(values))?
            .with_label(label)
            .with_unit(unit))
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.meta.set_label(label);
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.meta.set_unit(unit);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.meta.set_description(description);
        self
    }

    /// Independent deep copy with a new identity.
    pub fn copy(&self) -> Self {
        Self {
            meta: self.meta.renewed(),
            values: self.values.clone(),
        }
    }

    /// Metadata of this axis.
    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    /// Short name of the coordinate.
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

    /// Number of points.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false: axes have at least one point.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read-only view of the coordinates.
    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    /// Mutable view of the coordinates. The length cannot change through it.
    pub fn values_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.values.view_mut()
    }

    /// Coordinate at `index`, `None` when out of range.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Overwrite the coordinate at `index`.
    pub fn set(&mut self, index: usize, value: f64) -> AppResult<()> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or_else(|| DaqError::dimension_mismatch(&[len], &[index + 1]))?;
        *slot = value;
        Ok(())
    }

    /// `len + 1` evenly spaced cell boundaries centred on the first and last
    /// coordinates, as needed to draw the axis as image pixels.
    pub fn cell_edges(&self) -> Array1<f64> {
        let n = self.values.len();
        let first = self.values[0];
        let last = self.values[n - 1];
        let width = (last - first) / n as f64;
        Array1::linspace(first - width / 2.0, last + width / 2.0, n + 1)
    }

    /// Store this axis as a 1-D array inside `group`, with the same in-place
    /// overwrite rules as [`Dataset::persist`].
    pub fn persist(
        &self,
        backend: &mut dyn StorageBackend,
        group: &NodePath,
    ) -> AppResult<NodePath> {
        persist::persist_array(backend, group, &self.meta, self.values.view().into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn create_from_points_is_nan() {
        let axis = Axis::create(AxisSource::Points(4)).unwrap();
        assert_eq!(axis.len(), 4);
        assert!(axis.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn create_from_axis_is_deep_copy() {
        let mut freq = Axis::from_values("freq", "Hz", &[1.0, 2.0, 3.0]).unwrap();
        let copy = Axis::create(AxisSource::Axis(&freq)).unwrap();
        freq.set(0, 100.0).unwrap();

        assert_eq!(copy.get(0), Some(1.0));
        assert_eq!(copy.label(), "freq");
        assert_ne!(copy.id(), freq.id());
    }

    #[test]
    fn create_from_wrong_rank_dataset_fails() {
        let ds = Dataset::create(&[2, 2], "z", "", "").unwrap();
        assert!(matches!(
            Axis::create(AxisSource::Dataset(&ds)),
            Err(DaqError::InvalidSourceKind(_))
        ));

        let line = Dataset::from_array(array![5.0, 6.0].into_dyn(), "power", "dBm", "").unwrap();
        let axis = Axis::create(AxisSource::Dataset(&line)).unwrap();
        assert_eq!(axis.unit(), "dBm");
        assert_eq!(axis.get(1), Some(6.0));
    }

    #[test]
    fn empty_axis_is_rejected() {
        assert!(matches!(
            Axis::create(AxisSource::Points(0)),
            Err(DaqError::InvalidShape(_))
        ));
        assert!(Axis::create(AxisSource::Values(&[])).is_err());
    }

    #[test]
    fn set_out_of_range_fails() {
        let mut axis = Axis::create(AxisSource::Points(2)).unwrap();
        assert!(axis.set(2, 1.0).is_err());
        assert_eq!(axis.len(), 2);
    }

    #[test]
    fn cell_edges_bracket_coordinates() {
        let axis = Axis::from_values("x", "", &[0.0, 1.0, 2.0, 3.0]).unwrap();
        let edges = axis.cell_edges();
        assert_eq!(edges.len(), 5);
        assert!((edges[0] + 0.375).abs() < 1e-12);
        assert!((edges[4] - 3.375).abs() < 1e-12);
    }
}
