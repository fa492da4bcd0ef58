//! Auto-ingest wiring between a source container and a higher-rank consumer.
//!
//! Containers that take part in a chain live behind [`Shared`] handles. Linking
//! registers exactly one `completed` subscriber on the source; that subscriber
//! holds only a [`Weak`] handle to the consumer, and the consumer keeps a
//! [`SourceLink`] with a [`Weak`] handle back to the source. Neither side keeps
//! the other alive.
//!
//! Each `completed` event is consumed once: the consumer ingests a copy of the
//! source buffer as its next slice. Resetting and refilling the source later
//! produces a new `completed` event and therefore a new slice; slices already
//! ingested are never touched again.

use super::events::SubscriptionId;
use super::fill::Accumulator;
use crate::error::{AppResult, DaqError};
use ndarray::ArrayViewD;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Single-threaded shared handle used for linked containers.
pub type Shared<T> = Rc<RefCell<T>>;

/// Wrap a container in a [`Shared`] handle.
pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Non-owning relation from a consumer to the container it ingests from.
pub struct SourceLink<S> {
    handle: Weak<RefCell<S>>,
    subscription: SubscriptionId,
}

impl<S> SourceLink<S> {
    /// The source, if it is still alive.
    pub fn upgrade(&self) -> Option<Shared<S>> {
        self.handle.upgrade()
    }

    /// Subscription registered on the source.
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }
}

impl<S> fmt::Debug for SourceLink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLink")
            .field("alive", &(self.handle.strong_count() > 0))
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// A container that can ingest the complete buffer of a lower-rank container.
pub trait SliceConsumer: Accumulator {
    /// Container type this one ingests from.
    type Source: Accumulator;

    /// Shape of one slice.
    fn slice_shape(&self) -> Vec<usize>;

    /// Ingest one slice at the next position. Returns the position written.
    fn ingest_slice(&mut self, slice: ArrayViewD<'_, f64>) -> AppResult<usize>;

    /// Replace the stored source link, returning the previous one.
    fn attach_source(
        &mut self,
        link: Option<SourceLink<Self::Source>>,
    ) -> Option<SourceLink<Self::Source>>;

    /// Current source link.
    fn source(&self) -> Option<&SourceLink<Self::Source>>;
}

/// Subscribe `consumer` to every `completed` notification of `source`.
///
/// Fails with [`DaqError::DimensionMismatch`] if the source buffer does not have
/// the consumer's slice shape and with [`DaqError::ComponentBusy`] if either
/// container is currently borrowed. An existing link of `consumer` is replaced.
pub fn link<C>(source: &Shared<C::Source>, consumer: &Shared<C>) -> AppResult<SubscriptionId>
where
    C: SliceConsumer + 'static,
    C::Source: 'static,
{
    let expected = consumer
        .try_borrow()
        .map_err(|_| DaqError::ComponentBusy("consumer".into()))?
        .slice_shape();
    {
        let src = source
            .try_borrow()
            .map_err(|_| DaqError::ComponentBusy("source".into()))?;
        if src.data().shape() != expected.as_slice() {
            return Err(DaqError::dimension_mismatch(&expected, src.data().shape()));
        }
    }

    unlink(consumer)?;

    let target: Weak<RefCell<C>> = Rc::downgrade(consumer);
    let subscription = source
        .try_borrow_mut()
        .map_err(|_| DaqError::ComponentBusy("source".into()))?
        .on_completed(move |event| {
            let Some(consumer) = target.upgrade() else {
                return Ok(());
            };
            let mut consumer = consumer
                .try_borrow_mut()
                .map_err(|_| DaqError::ComponentBusy(event.container.to_string()))?;
            let slot = consumer.ingest_slice(event.data.view())?;
            trace!(source = event.container, consumer = consumer.name(), slot, "auto-ingested");
            Ok(())
        });

    let mut consumer = consumer
        .try_borrow_mut()
        .map_err(|_| DaqError::ComponentBusy("consumer".into()))?;
    debug!(consumer = consumer.name(), "linked to source");
    consumer.attach_source(Some(SourceLink {
        handle: Rc::downgrade(source),
        subscription,
    }));
    Ok(subscription)
}

/// Remove `consumer`'s subscription from its source.
///
/// Returns whether a live link was removed. A dead source just clears the link.
pub fn unlink<C: SliceConsumer>(consumer: &Shared<C>) -> AppResult<bool> {
    let mut consumer = consumer
        .try_borrow_mut()
        .map_err(|_| DaqError::ComponentBusy("consumer".into()))?;
    let Some(previous) = consumer.attach_source(None) else {
        return Ok(false);
    };
    let Some(source) = previous.upgrade() else {
        return Ok(false);
    };
    let removed = match source.try_borrow_mut() {
        Ok(mut source) => source.unsubscribe(previous.subscription),
        Err(_) => {
            let name = consumer.name().to_string();
            consumer.attach_source(Some(previous));
            return Err(DaqError::ComponentBusy(name));
        }
    };
    debug!(consumer = consumer.name(), "unlinked from source");
    Ok(removed)
}
