//! Three-dimensional sweeps built one surface at a time.

use super::axis::{Axis, AxisSource};
use super::dataset::Dataset;
use super::events::{self, ContainerEvent, SubscriptionId, Subscribers};
use super::fill::{Accumulator, FillCursor, FillState};
use super::link::{self, Shared, SliceConsumer, SourceLink};
use super::meta::Metadata;
use super::persist;
use super::slice::{FrameSlice, SliceSource};
use super::surface::SurfaceContainer;
use crate::error::{AppResult, DaqError};
use crate::storage::{NodePath, StorageBackend};
use ndarray::{ArrayView1, ArrayView3, ArrayViewD, Axis as ArrayAxis, Ix2, Ix3};
use tracing::{debug, trace};
use uuid::Uuid;

/// Storage `classname` of volume containers.
pub const VOLUME_CLASSNAME: &str = "VolumeContainer";

/// Where the frame axes and the data buffer of a new volume come from.
#[derive(Debug, Clone, Copy)]
pub enum VolumeLayout<'a> {
    /// Row and column axes; data starts NaN-filled.
    Axes(&'a Axis, &'a Axis),
    /// Row and column axes plus a rank-3 dataset of shape `(rows, columns, depth)`.
    AxesWithData(&'a Axis, &'a Axis, &'a Dataset),
    /// A surface whose axes and z metadata shape every frame.
    Prototype(&'a SurfaceContainer),
}

/// Accumulates one `(rows, columns)` frame per depth index.
#[derive(Debug)]
pub struct VolumeContainer {
    name: String,
    description: String,
    id: Uuid,
    rows: Axis,
    columns: Axis,
    index: Axis,
    data: Dataset,
    fill: FillCursor,
    subscribers: Subscribers,
    source: Option<SourceLink<SurfaceContainer>>,
}

impl VolumeContainer {
    /// New volume whose depth follows a copy of `index`.
    ///
    /// Fails with [`DaqError::InvalidSourceKind`] if a supplied dataset is not
    /// rank 3 and with [`DaqError::DimensionMismatch`] if its shape is not
    /// `(rows, columns, depth)`.
    pub fn new(name: impl Into<String>, index: &Axis, layout: VolumeLayout<'_>) -> AppResult<Self> {
        let index = Axis::create(AxisSource::Axis(index))?;
        let (rows, columns, data) = match layout {
            VolumeLayout::Axes(rows, columns) => {
                let shape = [rows.len(), columns.len(), index.len()];
                (
                    Axis::create(AxisSource::Axis(rows))?,
                    Axis::create(AxisSource::Axis(columns))?,
                    Dataset::with_meta(&shape, Metadata::new("data", "", ""))?,
                )
            }
            VolumeLayout::AxesWithData(rows, columns, data) => {
                if data.rank() != 3 {
                    return Err(DaqError::InvalidSourceKind(format!(
                        "volume data '{}' must be rank 3, has rank {}",
                        data.label(),
                        data.rank()
                    )));
                }
                let expected = [rows.len(), columns.len(), index.len()];
                if data.shape() != expected {
                    return Err(DaqError::dimension_mismatch(&expected, data.shape()));
                }
                (
                    Axis::create(AxisSource::Axis(rows))?,
                    Axis::create(AxisSource::Axis(columns))?,
                    data.copy(),
                )
            }
            VolumeLayout::Prototype(surface) => {
                let (r, c) = surface.shape();
                (
                    Axis::create(AxisSource::Axis(surface.rows()))?,
                    Axis::create(AxisSource::Axis(surface.columns()))?,
                    Dataset::with_meta(&[r, c, index.len()], surface.z().meta().renewed())?,
                )
            }
        };
        let fill = FillCursor::new(index.len());
        Ok(Self {
            name: name.into(),
            description: String::new(),
            id: Uuid::new_v4(),
            rows,
            columns,
            index,
            data,
            fill,
            subscribers: Subscribers::default(),
            source: None,
        })
    }

    /// Build a volume shaped after `source` and link it so every completed
    /// source surface is ingested as the next frame.
    pub fn linked(
        name: impl Into<String>,
        index: &Axis,
        source: &Shared<SurfaceContainer>,
    ) -> AppResult<Shared<Self>> {
        let volume = {
            let surface = source
                .try_borrow()
                .map_err(|_| DaqError::ComponentBusy("source surface".into()))?;
            Self::new(name, index, VolumeLayout::Prototype(&surface))?
        };
        let volume = link::shared(volume);
        link::link(source, &volume)?;
        Ok(volume)
    }

    /// Set the description stored on the container's group.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Relabel the data buffer.
    pub fn with_dependent_meta(
        mut self,
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.data = self.data.with_meta_text(label, unit, description);
        self
    }

    /// Container description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stable identity of the container's storage group.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// First frame axis.
    pub fn rows(&self) -> &Axis {
        &self.rows
    }

    /// Second frame axis.
    pub fn columns(&self) -> &Axis {
        &self.columns
    }

    /// Accumulation axis, one coordinate per frame.
    pub fn index(&self) -> &Axis {
        &self.index
    }

    /// The 3-D dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    /// Values as a `(rows, columns, depth)` view.
    pub fn values(&self) -> ArrayView3<'_, f64> {
        // rank 3 by construction
        self.data
            .values()
            .into_dimensionality::<Ix3>()
            .unwrap_or_else(|_| {
                ArrayView1::from(&[][..])
                    .insert_axis(ArrayAxis(1))
                    .insert_axis(ArrayAxis(2))
            })
    }

    /// `(rows, columns, depth)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows.len(), self.columns.len(), self.index.len())
    }

    /// Write one frame at the next depth index.
    ///
    /// Accepts a 2-D buffer, a rank-2 [`Dataset`] or a [`SurfaceContainer`];
    /// validation failures leave the volume untouched, as for
    /// [`SurfaceContainer::ingest_line`].
    pub fn ingest_frame<'a>(
        &mut self,
        frame: impl Into<FrameSlice<'a>>,
        index_value: Option<f64>,
    ) -> AppResult<usize> {
        let slot = self.fill.next_slot(&self.name)?;
        let frame: FrameSlice<'a> = frame.into();
        let frame = frame.view_as::<Ix2>()?;
        let expected = [self.rows.len(), self.columns.len()];
        if frame.shape() != expected {
            return Err(DaqError::dimension_mismatch(&expected, frame.shape()));
        }

        self.data
            .values_mut()
            .index_axis_mut(ArrayAxis(2), slot)
            .assign(&frame);
        if let Some(x) = index_value {
            self.index.set(slot, x)?;
        }
        let completed = self.fill.commit(slot);
        trace!(container = %self.name, cursor = slot, "volume frame ingested");
        if completed {
            debug!(container = %self.name, frames = self.index.len(), "volume complete");
        }
        events::emit_write(
            &mut self.subscribers,
            &self.name,
            slot,
            self.data.values(),
            completed,
        )?;
        Ok(slot)
    }

    /// Persist the three axes and the data under this volume's sub-group of `parent`.
    pub fn persist(
        &self,
        backend: &mut dyn StorageBackend,
        parent: &NodePath,
    ) -> AppResult<NodePath> {
        let group = persist::prepare_group(
            backend,
            parent,
            self.id,
            &self.name,
            VOLUME_CLASSNAME,
            &self.description,
        )?;
        self.rows.persist(backend, &group)?;
        self.columns.persist(backend, &group)?;
        self.index.persist(backend, &group)?;
        self.data.persist(backend, &group)?;
        backend.set_attribute(&group, "row_axis", &self.rows.id().to_string())?;
        backend.set_attribute(&group, "column_axis", &self.columns.id().to_string())?;
        backend.set_attribute(&group, "index_axis", &self.index.id().to_string())?;
        debug!(container = %self.name, group = %group, "volume persisted");
        Ok(group)
    }
}

impl Accumulator for VolumeContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor(&self) -> Option<usize> {
        self.fill.cursor()
    }

    fn capacity(&self) -> usize {
        self.fill.capacity()
    }

    fn state(&self) -> FillState {
        self.fill.state()
    }

    fn data(&self) -> ArrayViewD<'_, f64> {
        self.data.values()
    }

    fn reset(&mut self) {
        self.fill.reset();
        self.data.fill_nan();
        trace!(container = %self.name, "volume reset");
    }

    fn on_changed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static,
    {
        self.subscribers.on_changed(callback)
    }

    fn on_completed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static,
    {
        self.subscribers.on_completed(callback)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }
}

impl SliceConsumer for VolumeContainer {
    type Source = SurfaceContainer;

    fn slice_shape(&self) -> Vec<usize> {
        vec![self.rows.len(), self.columns.len()]
    }

    fn ingest_slice(&mut self, slice: ArrayViewD<'_, f64>) -> AppResult<usize> {
        self.ingest_frame(SliceSource::Buffer(slice), None)
    }

    fn attach_source(
        &mut self,
        link: Option<SourceLink<SurfaceContainer>>,
    ) -> Option<SourceLink<SurfaceContainer>> {
        std::mem::replace(&mut self.source, link)
    }

    fn source(&self) -> Option<&SourceLink<SurfaceContainer>> {
        self.source.as_ref()
    }
}
