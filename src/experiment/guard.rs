//! Scope release that survives early returns and panics.

use super::context::ExperimentContext;
use super::ScopeInfo;
use crate::error::{AppResult, DaqError};
use std::ops::{Deref, DerefMut};
use tracing::{error, warn};

/// Exclusive handle on an [`ExperimentContext`] with one scope entered.
///
/// [`ScopeGuard::finish`] exits the guarded scope, first exiting any nested
/// scopes left open above it. If the guard is dropped instead, because of an
/// early return or a panic, the same unwinding happens in `Drop` and failures
/// are logged.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    ctx: &'a mut ExperimentContext,
    base_depth: usize,
    finished: bool,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn new(ctx: &'a mut ExperimentContext, base_depth: usize) -> Self {
        Self {
            ctx,
            base_depth,
            finished: false,
        }
    }

    /// Depth the stack returns to when the guard completes.
    pub fn base_depth(&self) -> usize {
        self.base_depth
    }

    /// Exit the guarded scope and return its description.
    ///
    /// Nested scopes still open are exited first; their failures are merged into
    /// the returned [`DaqError::FlushFailed`]. Fails with
    /// [`DaqError::EmptyStack`] if the guarded scope was already exited by hand.
    pub fn finish(mut self) -> AppResult<ScopeInfo> {
        self.finished = true;
        if self.ctx.depth() <= self.base_depth {
            return Err(DaqError::EmptyStack);
        }
        let mut failures = self.ctx.unwind_to(self.base_depth + 1);
        match self.ctx.exit() {
            Ok(info) if failures.is_empty() => Ok(info),
            Ok(_) => Err(DaqError::FlushFailed(failures)),
            Err(DaqError::FlushFailed(own)) => {
                failures.extend(own);
                Err(DaqError::FlushFailed(failures))
            }
            Err(err) => {
                failures.push(err);
                Err(DaqError::FlushFailed(failures))
            }
        }
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = ExperimentContext;

    fn deref(&self) -> &Self::Target {
        &*self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.finished || self.ctx.depth() <= self.base_depth {
            return;
        }
        warn!(
            depth = self.ctx.depth(),
            target_depth = self.base_depth,
            panicking = std::thread::panicking(),
            "experiment scope released without finish"
        );
        for failure in self.ctx.unwind_to(self.base_depth) {
            error!(error = %failure, "failed to persist scope during unwinding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Component, Experiment};
    use crate::storage::StorageBackend;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    struct Noop(&'static str);

    impl Component for Noop {
        fn save(&mut self, _: &mut dyn StorageBackend, _: &ScopeInfo) -> AppResult<()> {
            Ok(())
        }
    }

    impl Experiment for Noop {
        fn label(&self) -> &str {
            self.0
        }

        fn script(&mut self, _: &mut ExperimentContext) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn finish_closes_leaked_children() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let outer = Rc::new(RefCell::new(Noop("outer")));
        let inner = Rc::new(RefCell::new(Noop("inner")));

        let mut guard = ctx.guard(&outer).unwrap();
        guard.enter(&inner).unwrap();
        assert_eq!(guard.depth(), 2);
        let info = guard.finish().unwrap();
        assert_eq!(info.label, "outer");
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn dropped_guard_unwinds() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let outer = Rc::new(RefCell::new(Noop("outer")));
        let inner = Rc::new(RefCell::new(Noop("inner")));

        ctx.enter(&outer).unwrap();
        {
            let guard = ctx.guard(&inner).unwrap();
            assert_eq!(guard.base_depth(), 1);
        }
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.current().unwrap().label, "outer");
        ctx.exit().unwrap();
    }

    #[test]
    #[traced_test]
    fn leaked_scope_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let outer = Rc::new(RefCell::new(Noop("outer")));
        let inner = Rc::new(RefCell::new(Noop("inner")));

        {
            let mut guard = ctx.guard(&outer).unwrap();
            guard.enter(&inner).unwrap();
        }
        assert_eq!(ctx.depth(), 0);
        assert!(logs_contain("experiment scope released without finish"));
        assert!(logs_contain("closed leaked scope"));
    }
}
