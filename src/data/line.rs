//! One-dimensional sweeps filled point by point.

use super::axis::{Axis, AxisSource};
use super::dataset::Dataset;
use super::events::{self, ContainerEvent, SubscriptionId, Subscribers};
use super::fill::{Accumulator, FillCursor, FillState};
use super::meta::Metadata;
use super::persist;
use crate::error::{AppResult, DaqError};
use crate::storage::{NodePath, StorageBackend};
use ndarray::{ArrayView1, ArrayViewD, Ix1};
use tracing::{debug, trace};
use uuid::Uuid;

/// Storage `classname` of line containers.
pub const LINE_CLASSNAME: &str = "LineContainer";

/// An independent-variable axis paired with an equally long dependent buffer.
///
/// Readings are appended one at a time; the container emits `changed` on every
/// append and `completed` once, when the last point is written.
///
/// # Example
///
/// ```
/// use sweep_daq::data::{Accumulator, Axis, LineContainer};
///
/// # fn main() -> sweep_daq::AppResult<()> {
/// let freq = Axis::from_values("freq", "Hz", &[1.0, 2.0, 3.0])?;
/// let mut trace = LineContainer::new("VNA trace", &freq, "mag", "dB", "")?;
/// for value in [0.5, 0.7, 0.9] {
///     trace.append(value, None)?;
/// }
/// assert!(trace.is_full());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LineContainer {
    name: String,
    description: String,
    id: Uuid,
    independent: Axis,
    dependent: Dataset,
    fill: FillCursor,
    subscribers: Subscribers,
}

impl LineContainer {
    /// New line over a copy of `independent` with a NaN-filled dependent buffer.
    pub fn new(
        name: impl Into<String>,
        independent: &Axis,
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> AppResult<Self> {
        let independent = Axis::create(AxisSource::Axis(independent))?;
        let dependent = Dataset::with_meta(
            &[independent.len()],
            Metadata::new(label, unit, description),
        )?;
        Ok(Self::assemble(name.into(), independent, dependent))
    }

    /// New line from copies of an existing axis and rank-1 dataset of equal length.
    pub fn from_parts(
        name: impl Into<String>,
        independent: &Axis,
        dependent: &Dataset,
    ) -> AppResult<Self> {
        if dependent.rank() != 1 {
            return Err(DaqError::InvalidSourceKind(format!(
                "dependent dataset '{}' must be rank 1, has rank {}",
                dependent.label(),
                dependent.rank()
            )));
        }
        if dependent.shape() != [independent.len()] {
            return Err(DaqError::dimension_mismatch(
                &[independent.len()],
                dependent.shape(),
            ));
        }
        Ok(Self::assemble(
            name.into(),
            Axis::create(AxisSource::Axis(independent))?,
            dependent.copy(),
        ))
    }

    fn assemble(name: String, independent: Axis, dependent: Dataset) -> Self {
        let fill = FillCursor::new(independent.len());
        Self {
            name,
            description: String::new(),
            id: Uuid::new_v4(),
            independent,
            dependent,
            fill,
            subscribers: Subscribers::default(),
        }
    }

    /// Set the description stored on the container's group.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
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

    /// The independent-variable axis.
    pub fn independent(&self) -> &Axis {
        &self.independent
    }

    /// Mutable access to the independent axis; its length cannot change.
    pub fn independent_mut(&mut self) -> &mut Axis {
        &mut self.independent
    }

    /// The dependent dataset.
    pub fn dependent(&self) -> &Dataset {
        &self.dependent
    }

    /// Dependent values as a 1-D view.
    pub fn values(&self) -> ArrayView1<'_, f64> {
        // The dependent dataset is rank 1 by construction.
        self.dependent
            .values()
            .into_dimensionality::<Ix1>()
            .unwrap_or_else(|_| ArrayView1::from(&[][..]))
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.fill.capacity()
    }

    /// Always false: lines have at least one point.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one reading at the next position.
    ///
    /// When `independent_value` is given it is written into the axis at the same
    /// position. Returns the position written. Fails with
    /// [`DaqError::ContainerFull`] without touching any state once every point has
    /// been written. A [`DaqError::SubscriberFailed`] means the point was stored
    /// but a subscriber (such as a linked surface) rejected it.
    pub fn append(&mut self, value: f64, independent_value: Option<f64>) -> AppResult<usize> {
        let slot = self.fill.next_slot(&self.name)?;
        self.dependent.values_mut()[[slot]] = value;
        if let Some(x) = independent_value {
            self.independent.set(slot, x)?;
        }
        let completed = self.fill.commit(slot);
        trace!(container = %self.name, cursor = slot, value, "line point appended");
        if completed {
            debug!(container = %self.name, points = self.len(), "line complete");
        }
        events::emit_write(
            &mut self.subscribers,
            &self.name,
            slot,
            self.dependent.values(),
            completed,
        )?;
        Ok(slot)
    }

    /// Replace the whole dependent buffer at once and mark the line complete.
    ///
    /// Emits `changed` and then `completed`. Fails with
    /// [`DaqError::ContainerFull`] if the line is already full and with
    /// [`DaqError::DimensionMismatch`] if the length differs.
    pub fn replace_dependent(&mut self, values: &[f64]) -> AppResult<()> {
        self.fill.next_slot(&self.name)?;
        if values.len() != self.len() {
            return Err(DaqError::dimension_mismatch(&[self.len()], &[values.len()]));
        }
        self.dependent
            .values_mut()
            .assign(&ArrayView1::from(values).into_dyn());
        let last = self.fill.fill_all();
        debug!(container = %self.name, points = self.len(), "line replaced wholesale");
        events::emit_write(
            &mut self.subscribers,
            &self.name,
            last,
            self.dependent.values(),
            true,
        )
    }

    /// Persist the axis and dependent dataset under this line's sub-group of `parent`.
    ///
    /// The sub-group is named after the container (numeric suffix on collision) and
    /// reused on later calls, so re-persisting overwrites in place.
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
            LINE_CLASSNAME,
            &self.description,
        )?;
        self.independent.persist(backend, &group)?;
        self.dependent.persist(backend, &group)?;
        backend.set_attribute(&group, "independent_axis", &self.independent.id().to_string())?;
        debug!(container = %self.name, group = %group, "line persisted");
        Ok(group)
    }
}

impl Accumulator for LineContainer {
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
        self.dependent.values()
    }

    /// Cursor back to empty and dependent data back to NaN. The axis is kept.
    fn reset(&mut self) {
        self.fill.reset();
        self.dependent.fill_nan();
        trace!(container = %self.name, "line reset");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use ndarray::array;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn freq_axis() -> Axis {
        Axis::from_values("freq", "Hz", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap()
    }

    #[test]
    fn seven_appends_fill_the_line() {
        let mut line = LineContainer::new("VNA trace", &freq_axis(), "mag", "dB", "").unwrap();
        for value in 0..6 {
            line.append(f64::from(value), None).unwrap();
            assert!(!line.is_full());
        }
        line.append(6.0, None).unwrap();

        assert_eq!(line.cursor(), Some(6));
        assert!(line.is_full());
        assert_eq!(line.values(), array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let err = line.append(7.0, None).unwrap_err();
        assert!(matches!(err, DaqError::ContainerFull { .. }));
        assert_eq!(line.cursor(), Some(6));
        assert_eq!(line.values()[6], 6.0);
    }

    #[test]
    fn append_writes_independent_value() {
        let axis = Axis::create(AxisSource::Points(2)).unwrap().with_label("t");
        let mut line = LineContainer::new("timed", &axis, "v", "V", "").unwrap();
        line.append(1.0, Some(0.25)).unwrap();
        assert_eq!(line.independent().get(0), Some(0.25));
        assert!(line.independent().get(1).unwrap_or_default().is_nan());
    }

    #[test]
    fn completed_fires_exactly_once() {
        let mut line = LineContainer::new("trace", &freq_axis(), "mag", "dB", "").unwrap();
        let changed = Rc::new(RefCell::new(0));
        let completed = Rc::new(RefCell::new(0));

        let c = changed.clone();
        line.on_changed(move |_| {
            *c.borrow_mut() += 1;
            Ok(())
        });
        let c = completed.clone();
        line.on_completed(move |ev| {
            assert_eq!(ev.data.len(), 7);
            *c.borrow_mut() += 1;
            Ok(())
        });

        for value in 0..7 {
            line.append(f64::from(value), None).unwrap();
        }
        let _ = line.append(0.0, None);

        assert_eq!(*changed.borrow(), 7);
        assert_eq!(*completed.borrow(), 1);
    }

    #[test]
    fn reset_refills_with_nan() {
        let mut line = LineContainer::new("trace", &freq_axis(), "mag", "dB", "").unwrap();
        for value in 0..7 {
            line.append(f64::from(value), None).unwrap();
        }
        line.reset();

        assert_eq!(line.state(), FillState::Empty);
        assert_eq!(line.cursor(), None);
        assert_eq!(line.len(), 7);
        assert_eq!(line.dependent().written(), 0);
        assert_eq!(line.independent().get(2), Some(3.0));
        line.append(9.0, None).unwrap();
        assert_eq!(line.cursor(), Some(0));
    }

    #[test]
    fn from_parts_validates_dependent() {
        let axis = freq_axis();
        let short = Dataset::create(&[3], "mag", "", "").unwrap();
        assert!(matches!(
            LineContainer::from_parts("t", &axis, &short),
            Err(DaqError::DimensionMismatch { .. })
        ));
        let surface = Dataset::create(&[7, 2], "mag", "", "").unwrap();
        assert!(matches!(
            LineContainer::from_parts("t", &axis, &surface),
            Err(DaqError::InvalidSourceKind(_))
        ));
    }

    #[test]
    fn replace_dependent_completes() {
        let mut line = LineContainer::new("trace", &freq_axis(), "mag", "dB", "").unwrap();
        let completed = Rc::new(RefCell::new(false));
        let c = completed.clone();
        line.on_completed(move |_| {
            *c.borrow_mut() = true;
            Ok(())
        });

        assert!(line.replace_dependent(&[1.0; 3]).is_err());
        line.replace_dependent(&[2.0; 7]).unwrap();

        assert!(*completed.borrow());
        assert!(line.is_full());
        assert!(matches!(
            line.replace_dependent(&[2.0; 7]),
            Err(DaqError::ContainerFull { .. })
        ));
    }

    #[test]
    fn persist_writes_group_and_arrays() {
        let mut backend = MemoryBackend::new();
        let root = NodePath::root();
        let line = LineContainer::new("VNA trace", &freq_axis(), "mag", "dB", "")
            .unwrap()
            .with_description("bias sweep");

        let group = line.persist(&mut backend, &root).unwrap();
        assert_eq!(group.name(), "VNA trace");
        assert_eq!(
            backend.attribute(&group, "classname").unwrap().as_deref(),
            Some(LINE_CLASSNAME)
        );
        assert_eq!(
            backend.children(&group).unwrap(),
            vec!["freq".to_string(), "mag".to_string()]
        );

        let again = line.persist(&mut backend, &root).unwrap();
        assert_eq!(group, again);
        assert_eq!(backend.children(&root).unwrap().len(), 1);
    }
}
