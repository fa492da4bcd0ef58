//! Change notifications emitted by accumulating containers.
//!
//! Every container owns a [`Subscribers`] set with two subscription points:
//!
//! - `changed`: after every append/ingest, with the slot just written.
//! - `completed`: exactly once per fill, when the last slot is written.
//!
//! Subscribers receive a read-only view of the container's full dependent
//! buffer as it stands after the write, so a visualization layer never needs to
//! borrow the container itself. Auto-ingest links are ordinary `completed`
//! subscribers (see [`crate::data::link`]).

use crate::error::{AppResult, DaqError};
use ndarray::ArrayViewD;
use std::fmt;

/// Which notification is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A slot was written.
    Changed,
    /// The final slot was written; the container is full.
    Completed,
}

/// Notification payload.
#[derive(Debug)]
pub struct ContainerEvent<'a> {
    /// Notification kind.
    pub kind: EventKind,
    /// Name of the emitting container.
    pub container: &'a str,
    /// Slot that was just written.
    pub cursor: usize,
    /// The emitter's complete dependent buffer after the write.
    pub data: ArrayViewD<'a, f64>,
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&ContainerEvent<'_>) -> AppResult<()>>;

/// Subscriber lists of one container.
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    changed: Vec<(SubscriptionId, Callback)>,
    completed: Vec<(SubscriptionId, Callback)>,
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("changed", &self.changed.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}

impl Subscribers {
    /// Subscribe to `changed` notifications.
    pub fn on_changed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static,
    {
        let id = self.allocate();
        self.changed.push((id, Box::new(callback)));
        id
    }

    /// Subscribe to `completed` notifications.
    pub fn on_completed<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static,
    {
        let id = self.allocate();
        self.completed.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.changed.retain(|(sub, _)| *sub != id);
        self.completed.retain(|(sub, _)| *sub != id);
        self.len() != before
    }

    /// Total number of live subscriptions.
    pub fn len(&self) -> usize {
        self.changed.len() + self.completed.len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber of its kind, in subscription order.
    ///
    /// All subscribers are called even if one fails; the first failure is
    /// returned wrapped in [`DaqError::SubscriberFailed`].
    pub(crate) fn notify(&mut self, event: &ContainerEvent<'_>) -> AppResult<()> {
        let list = match event.kind {
            EventKind::Changed => &mut self.changed,
            EventKind::Completed => &mut self.completed,
        };
        let mut first_error = None;
        for (_, callback) in list.iter_mut() {
            if let Err(err) = callback(event) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(DaqError::SubscriberFailed(Box::new(err))),
            None => Ok(()),
        }
    }

    fn allocate(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Emit `changed` and, when `completed` is true, `completed` for one write.
///
/// Both notifications are always delivered; the first subscriber error wins.
pub(crate) fn emit_write(
    subscribers: &mut Subscribers,
    container: &str,
    cursor: usize,
    data: ArrayViewD<'_, f64>,
    completed: bool,
) -> AppResult<()> {
    let changed = subscribers.notify(&ContainerEvent {
        kind: EventKind::Changed,
        container,
        cursor,
        data: data.view(),
    });
    let done = if completed {
        subscribers.notify(&ContainerEvent {
            kind: EventKind::Completed,
            container,
            cursor,
            data,
        })
    } else {
        Ok(())
    };
    changed.and(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn subscribers_are_called_by_kind() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut subs = Subscribers::default();

        let log = seen.clone();
        subs.on_changed(move |ev| {
            log.borrow_mut().push(("changed", ev.cursor));
            Ok(())
        });
        let log = seen.clone();
        subs.on_completed(move |ev| {
            log.borrow_mut().push(("completed", ev.cursor));
            Ok(())
        });

        let data = array![1.0, 2.0].into_dyn();
        emit_write(&mut subs, "trace", 0, data.view(), false).unwrap();
        emit_write(&mut subs, "trace", 1, data.view(), true).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![("changed", 0), ("changed", 1), ("completed", 1)]
        );
    }

    #[test]
    fn unsubscribe_removes_callback() {
        let mut subs = Subscribers::default();
        let id = subs.on_changed(|_| Ok(()));
        assert_eq!(subs.len(), 1);
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        assert!(subs.is_empty());
    }

    #[test]
    fn failing_subscriber_does_not_starve_others() {
        let calls = Rc::new(RefCell::new(0));
        let mut subs = Subscribers::default();
        subs.on_changed(|_| Err(DaqError::EmptyStack));
        let counter = calls.clone();
        subs.on_changed(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });

        let data = array![0.0].into_dyn();
        let err = emit_write(&mut subs, "trace", 0, data.view(), false).unwrap_err();
        assert!(matches!(err, DaqError::SubscriberFailed(_)));
        assert_eq!(*calls.borrow(), 1);
    }
}
