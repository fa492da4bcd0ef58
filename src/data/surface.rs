//! Two-dimensional sweeps built one line at a time.

use super::axis::{Axis, AxisSource};
use super::dataset::Dataset;
use super::events::{self, ContainerEvent, SubscriptionId, Subscribers};
use super::fill::{Accumulator, FillCursor, FillState};
use super::line::LineContainer;
use super::link::{self, Shared, SliceConsumer, SourceLink};
use super::meta::Metadata;
use super::persist;
use super::slice::{LineSlice, SliceSource};
use crate::error::{AppResult, DaqError};
use crate::storage::{NodePath, StorageBackend};
use ndarray::{ArrayView1, ArrayView2, ArrayViewD, Axis as ArrayAxis, Ix1, Ix2};
use tracing::{debug, trace};
use uuid::Uuid;

/// Storage `classname` of surface containers.
pub const SURFACE_CLASSNAME: &str = "SurfaceContainer";

/// Where the row axis and the z buffer of a new surface come from.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceLayout<'a> {
    /// Row axis only; z starts NaN-filled and labelled `z data`.
    Rows(&'a Axis),
    /// Row axis plus a rank-2 dataset of shape `(rows, columns)` used as the z buffer.
    RowsWithData(&'a Axis, &'a Dataset),
    /// A line whose independent axis becomes the row axis and whose dependent
    /// metadata labels z.
    Prototype(&'a LineContainer),
}

/// Accumulates one line per column into a `(rows, columns)` z buffer.
///
/// The column axis is the accumulation dimension: `ingest_line` fills column 0,
/// then 1, and so on, and the container is full once every column is written.
#[derive(Debug)]
pub struct SurfaceContainer {
    name: String,
    description: String,
    id: Uuid,
    rows: Axis,
    columns: Axis,
    z: Dataset,
    fill: FillCursor,
    subscribers: Subscribers,
    source: Option<SourceLink<LineContainer>>,
}

impl SurfaceContainer {
    /// New surface over copies of `columns` and the row axis given by `layout`.
    ///
    /// Fails with [`DaqError::InvalidSourceKind`] if a supplied dataset is not
    /// rank 2 and with [`DaqError::DimensionMismatch`] if its shape is not
    /// `(rows, columns)`.
    pub fn new(
        name: impl Into<String>,
        columns: &Axis,
        layout: SurfaceLayout<'_>,
    ) -> AppResult<Self> {
        let columns = Axis::create(AxisSource::Axis(columns))?;
        let (rows, z) = match layout {
            SurfaceLayout::Rows(rows) => {
                let rows = Axis::create(AxisSource::Axis(rows))?;
                let z = Dataset::with_meta(
                    &[rows.len(), columns.len()],
                    Metadata::new("z data", "", ""),
                )?;
                (rows, z)
            }
            SurfaceLayout::RowsWithData(rows, data) => {
                if data.rank() != 2 {
                    return Err(DaqError::InvalidSourceKind(format!(
                        "surface data '{}' must be rank 2, has rank {}",
                        data.label(),
                        data.rank()
                    )));
                }
                let expected = [rows.len(), columns.len()];
                if data.shape() != expected {
                    return Err(DaqError::dimension_mismatch(&expected, data.shape()));
                }
                (Axis::create(AxisSource::Axis(rows))?, data.copy())
            }
            SurfaceLayout::Prototype(line) => {
                let rows = Axis::create(AxisSource::Axis(line.independent()))?;
                let z = Dataset::with_meta(
                    &[rows.len(), columns.len()],
                    line.dependent().meta().renewed(),
                )?;
                (rows, z)
            }
        };
        let fill = FillCursor::new(columns.len());
        Ok(Self {
            name: name.into(),
            description: String::new(),
            id: Uuid::new_v4(),
            rows,
            columns,
            z,
            fill,
            subscribers: Subscribers::default(),
            source: None,
        })
    }

    /// Build a surface shaped after `source` and link it so every completed
    /// source line is ingested as the next column.
    pub fn linked(
        name: impl Into<String>,
        columns: &Axis,
        source: &Shared<LineContainer>,
    ) -> AppResult<Shared<Self>> {
        let surface = {
            let line = source
                .try_borrow()
                .map_err(|_| DaqError::ComponentBusy("source line".into()))?;
            Self::new(name, columns, SurfaceLayout::Prototype(&line))?
        };
        let surface = link::shared(surface);
        link::link(source, &surface)?;
        Ok(surface)
    }

    /// Set the description stored on the container's group.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Relabel the z buffer.
    pub fn with_dependent_meta(
        mut self,
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.z = self.z.with_meta_text(label, unit, description);
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

    /// Axis along each ingested line.
    pub fn rows(&self) -> &Axis {
        &self.rows
    }

    /// Accumulation axis, one coordinate per ingested line.
    pub fn columns(&self) -> &Axis {
        &self.columns
    }

    /// The z dataset.
    pub fn z(&self) -> &Dataset {
        &self.z
    }

    /// z values as a `(rows, columns)` view.
    pub fn values(&self) -> ArrayView2<'_, f64> {
        // z is rank 2 by construction.
        self.z
            .values()
            .into_dimensionality::<Ix2>()
            .unwrap_or_else(|_| ArrayView1::from(&[][..]).insert_axis(ArrayAxis(1)))
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// Write one line into the next column.
    ///
    /// Accepts a 1-D buffer, a rank-1 [`Dataset`] or a [`LineContainer`]. When
    /// `index_value` is given it is written into the column axis. Nothing is
    /// modified if the surface is full ([`DaqError::ContainerFull`]), the input
    /// has the wrong rank ([`DaqError::InvalidSourceKind`]) or the wrong length
    /// ([`DaqError::DimensionMismatch`]).
    pub fn ingest_line<'a>(
        &mut self,
        line: impl Into<LineSlice<'a>>,
        index_value: Option<f64>,
    ) -> AppResult<usize> {
        let slot = self.fill.next_slot(&self.name)?;
        let line: LineSlice<'a> = line.into();
        let column = line.view_as::<Ix1>()?;
        if column.len() != self.rows.len() {
            return Err(DaqError::dimension_mismatch(&[self.rows.len()], &[column.len()]));
        }

        self.z
            .values_mut()
            .index_axis_mut(ArrayAxis(1), slot)
            .assign(&column);
        if let Some(x) = index_value {
            self.columns.set(slot, x)?;
        }
        let completed = self.fill.commit(slot);
        trace!(container = %self.name, cursor = slot, "surface column ingested");
        if completed {
            debug!(container = %self.name, columns = self.columns.len(), "surface complete");
        }
        events::emit_write(
            &mut self.subscribers,
            &self.name,
            slot,
            self.z.values(),
            completed,
        )?;
        Ok(slot)
    }

    /// Persist row axis, column axis and z under this surface's sub-group of `parent`.
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
            SURFACE_CLASSNAME,
            &self.description,
        )?;
        self.rows.persist(backend, &group)?;
        self.columns.persist(backend, &group)?;
        self.z.persist(backend, &group)?;
        backend.set_attribute(&group, "row_axis", &self.rows.id().to_string())?;
        backend.set_attribute(&group, "column_axis", &self.columns.id().to_string())?;
        debug!(container = %self.name, group = %group, "surface persisted");
        Ok(group)
    }
}

impl Accumulator for SurfaceContainer {
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
        self.z.values()
    }

    fn reset(&mut self) {
        self.fill.reset();
        self.z.fill_nan();
        trace!(container = %self.name, "surface reset");
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

impl SliceConsumer for SurfaceContainer {
    type Source = LineContainer;

    fn slice_shape(&self) -> Vec<usize> {
        vec![self.rows.len()]
    }

    fn ingest_slice(&mut self, slice: ArrayViewD<'_, f64>) -> AppResult<usize> {
        self.ingest_line(SliceSource::Buffer(slice), None)
    }

    fn attach_source(
        &mut self,
        link: Option<SourceLink<LineContainer>>,
    ) -> Option<SourceLink<LineContainer>> {
        std::mem::replace(&mut self.source, link)
    }

    fn source(&self) -> Option<&SourceLink<LineContainer>> {
        self.source.as_ref()
    }
}
