//! Nested experiments with hierarchical storage.
//!
//! An [`ExperimentContext`] is created per top-level run and threaded through
//! every experiment script. Entering an experiment pushes a scope:
//!
//! ```text
//! depth 0  "sweep 2026-10-16_101500"      <base_dir>/sweep .../data.json, group /
//! depth 1  "power 2026-10-16_101502"      group /power 2026-10-16_101502
//! depth 2  "trace 2026-10-16_101502"      group /power .../trace 2026-10-16_101502
//! ```
//!
//! Components registered while a scope is on top are persisted into that
//! scope's group, in registration order, when the scope exits. The entering
//! experiment is always the first pending component of its own scope.
//!
//! [`ExperimentContext::run`] enters, runs the script and exits through a
//! [`ScopeGuard`], so the stack is balanced even when a script fails or panics.

mod component;
mod context;
mod guard;

pub use context::{ExperimentContext, ExperimentScope};
pub use guard::ScopeGuard;

use crate::error::AppResult;
use crate::storage::{NodePath, StorageBackend};
use chrono::{DateTime, Local};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Storage `classname` of experiment scope groups.
pub const EXPERIMENT_CLASSNAME: &str = "Experiment";

/// Public description of one stack level.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeInfo {
    /// Experiment label.
    pub label: String,
    /// Nesting depth, 0 for the top-level experiment.
    pub level: usize,
    /// Storage group of this scope.
    pub group: NodePath,
    /// Directory for side files of this scope.
    pub directory: PathBuf,
    /// Storage file shared by every scope of the run.
    pub storage_file: PathBuf,
    /// When the scope was entered.
    pub started: DateTime<Local>,
}

/// Anything that can be persisted when the scope it is registered in exits.
pub trait Component {
    /// Write this component into `scope.group` of `backend`.
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()>;
}

/// A unit of work that owns a scope on the experiment stack.
///
/// # Example
///
/// ```
/// use sweep_daq::data::{shared, Axis, LineContainer};
/// use sweep_daq::experiment::{Component, Experiment, ExperimentContext, ScopeInfo};
/// use sweep_daq::storage::StorageBackend;
/// use sweep_daq::AppResult;
///
/// struct Trace;
///
/// impl Component for Trace {
///     fn save(&mut self, _: &mut dyn StorageBackend, _: &ScopeInfo) -> AppResult<()> {
///         Ok(())
///     }
/// }
///
/// impl Experiment for Trace {
///     fn label(&self) -> &str {
///         "trace"
///     }
///
///     fn script(&mut self, ctx: &mut ExperimentContext) -> AppResult<()> {
///         let freq = Axis::from_values("freq", "Hz", &[1.0, 2.0])?;
///         let line = shared(LineContainer::new("VNA trace", &freq, "mag", "dB", "")?);
///         ctx.register(&line)?;
///         line.borrow_mut().append(0.1, None)?;
///         line.borrow_mut().append(0.2, None)?;
///         Ok(())
///     }
/// }
///
/// # fn main() -> AppResult<()> {
/// let dir = tempfile::tempdir()?;
/// let mut ctx = ExperimentContext::new(dir.path());
/// let info = ctx.run(&shared(Trace))?;
/// assert!(info.storage_file.exists());
/// # Ok(())
/// # }
/// ```
pub trait Experiment: Component {
    /// Label used for the scope's group and directory names.
    fn label(&self) -> &str;

    /// Stored as the scope group's `description` attribute when non-empty.
    fn description(&self) -> &str {
        ""
    }

    /// Body of the experiment. Runs with this experiment's scope on top.
    fn script(&mut self, ctx: &mut ExperimentContext) -> AppResult<()>;
}

/// Type-erased component handle held by a scope's pending list.
pub type SharedComponent = Rc<RefCell<dyn Component>>;
