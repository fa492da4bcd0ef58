//! Inputs accepted by `ingest_line` / `ingest_frame`.
//!
//! A slice is one of three tagged variants, each with a single conversion into
//! the view the receiving container writes from:
//!
//! - [`SliceSource::Buffer`]: a raw array view of any rank.
//! - [`SliceSource::Dataset`]: a [`Dataset`]'s values.
//! - [`SliceSource::Container`]: a lower-rank container's dependent buffer.
//!
//! A wrong rank is reported as [`DaqError::InvalidSourceKind`]; a wrong length
//! is checked by the receiver and reported as [`DaqError::DimensionMismatch`].

use super::dataset::Dataset;
use super::fill::Accumulator;
use super::line::LineContainer;
use super::surface::SurfaceContainer;
use crate::error::{AppResult, DaqError};
use ndarray::{ArrayView, ArrayView1, ArrayViewD, Dimension};

/// One slice for a container whose slices come from containers of type `C`.
#[derive(Debug)]
pub enum SliceSource<'a, C> {
    /// Raw values.
    Buffer(ArrayViewD<'a, f64>),
    /// Values of a dataset.
    Dataset(&'a Dataset),
    /// Dependent buffer of a lower-rank container.
    Container(&'a C),
}

/// Slice fed to a [`SurfaceContainer`].
pub type LineSlice<'a> = SliceSource<'a, LineContainer>;

/// Slice fed to a [`crate::data::VolumeContainer`].
pub type FrameSlice<'a> = SliceSource<'a, SurfaceContainer>;

impl<'a, C: Accumulator> SliceSource<'a, C> {
    /// View the slice with the dimensionality `D` the receiver expects.
    pub fn view_as<D: Dimension>(&self) -> AppResult<ArrayView<'a, f64, D>> {
        let (view, what) = match self {
            SliceSource::Buffer(view) => (view.clone(), "buffer".to_string()),
            SliceSource::Dataset(dataset) => {
                let dataset: &'a Dataset = *dataset;
                (dataset.values(), format!("dataset '{}'", dataset.label()))
            }
            SliceSource::Container(container) => {
                let container: &'a C = *container;
                (container.data(), format!("container '{}'", container.name()))
            }
        };
        let found = view.ndim();
        view.into_dimensionality::<D>().map_err(|_| {
            DaqError::InvalidSourceKind(format!(
                "expected a rank-{} slice, {what} has rank {found}",
                D::NDIM.unwrap_or(0)
            ))
        })
    }
}

impl<'a, C> From<&'a [f64]> for SliceSource<'a, C> {
    fn from(values: &'a [f64]) -> Self {
        SliceSource::Buffer(ArrayView1::from(values).into_dyn())
    }
}

impl<'a, C, D: Dimension> From<ArrayView<'a, f64, D>> for SliceSource<'a, C> {
    fn from(view: ArrayView<'a, f64, D>) -> Self {
        SliceSource::Buffer(view.into_dyn())
    }
}

impl<'a, C> From<&'a Dataset> for SliceSource<'a, C> {
    fn from(dataset: &'a Dataset) -> Self {
        SliceSource::Dataset(dataset)
    }
}

impl<'a> From<&'a LineContainer> for LineSlice<'a> {
    fn from(line: &'a LineContainer) -> Self {
        SliceSource::Container(line)
    }
}

impl<'a> From<&'a SurfaceContainer> for FrameSlice<'a> {
    fn from(surface: &'a SurfaceContainer) -> Self {
        SliceSource::Container(surface)
    }
}
