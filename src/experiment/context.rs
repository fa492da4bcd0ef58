//! The experiment stack.

use super::guard::ScopeGuard;
use super::{Component, Experiment, ScopeInfo, SharedComponent, EXPERIMENT_CLASSNAME};
use crate::config::SweepConfig;
use crate::data::meta::storage_safe;
use crate::error::{AppResult, DaqError};
use crate::storage::{
    self, NodePath, StorageBackend, StorageFormat, ATTR_CLASSNAME, ATTR_DESCRIPTION,
};
use chrono::Local;
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// One level of the stack: where it stores and what it will persist on exit.
pub struct ExperimentScope {
    info: ScopeInfo,
    pending: Vec<SharedComponent>,
}

impl fmt::Debug for ExperimentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentScope")
            .field("info", &self.info)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ExperimentScope {
    /// Scope description.
    pub fn info(&self) -> &ScopeInfo {
        &self.info
    }

    /// Number of components waiting to be persisted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Execution context of one top-level experiment run.
///
/// Holds the scope stack and, while any scope is active, the open storage
/// backend. The backend is opened when the top-level experiment enters and
/// released when it exits. Dropping a context with scopes still open exits them.
pub struct ExperimentContext {
    base_dir: PathBuf,
    format: StorageFormat,
    file_name: String,
    backend: Option<Box<dyn StorageBackend>>,
    stack: Vec<ExperimentScope>,
}

impl fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("base_dir", &self.base_dir)
            .field("format", &self.format)
            .field("file_name", &self.file_name)
            .field("open", &self.backend.is_some())
            .field("stack", &self.stack)
            .finish()
    }
}

impl ExperimentContext {
    /// Context storing top-level experiments under `base_dir` as JSON.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            format: StorageFormat::default(),
            file_name: "data".to_string(),
            backend: None,
            stack: Vec::new(),
        }
    }

    /// Context configured from the `[storage]` section.
    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(config.storage.base_dir.clone())
            .with_format(config.storage.format)
            .with_file_name(config.storage.file_name.clone())
    }

    /// Storage file format for the next top-level experiment.
    pub fn with_format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    /// Storage file name, without extension, for the next top-level experiment.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Directory holding top-level experiment directories.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether no scope is active.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// The top scope.
    pub fn current(&self) -> AppResult<&ScopeInfo> {
        self.stack
            .last()
            .map(|scope| &scope.info)
            .ok_or(DaqError::EmptyStack)
    }

    /// Active scopes, outermost first.
    pub fn scopes(&self) -> impl Iterator<Item = &ExperimentScope> {
        self.stack.iter()
    }

    /// The open backend.
    pub fn backend(&self) -> AppResult<&dyn StorageBackend> {
        match self.backend.as_deref() {
            Some(backend) => Ok(backend),
            None => Err(DaqError::EmptyStack),
        }
    }

    /// The open backend, for writing outside the pending-list mechanism.
    pub fn backend_mut(&mut self) -> AppResult<&mut dyn StorageBackend> {
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => Err(DaqError::EmptyStack),
        }
    }

    /// Push a scope for `experiment`.
    ///
    /// On an empty stack this creates the run directory under the base directory
    /// and opens the storage file inside it ([`DaqError::StorageUnavailable`] if
    /// either cannot be created). Otherwise it creates a child group of the current
    /// scope's group and a matching subdirectory. Group and directory are named
    /// `<label> <YYYY-mm-dd_HHMMSS>`, with a numeric suffix on collision.
    ///
    /// The experiment becomes the first pending component of the new scope.
    pub fn enter<E>(&mut self, experiment: &Rc<RefCell<E>>) -> AppResult<&ScopeInfo>
    where
        E: Experiment + 'static,
    {
        let (label, description) = {
            let exp = experiment
                .try_borrow()
                .map_err(|_| DaqError::ComponentBusy("entering experiment".into()))?;
            (exp.label().to_string(), exp.description().to_string())
        };
        let started = Local::now();
        let name = format!(
            "{}{}",
            storage_safe(&label, EXPERIMENT_CLASSNAME),
            started.format(" %Y-%m-%d_%H%M%S")
        );
        let level = self.stack.len();

        let parent = self.stack.last().map(|scope| scope.info.clone());
        let info = match parent {
            None => {
                let directory = create_unique_dir(&self.base_dir, &name)?;
                let storage_file =
                    directory.join(format!("{}.{}", self.file_name, self.format.extension()));
                let mut backend = storage::open_backend(self.format, &storage_file)?;
                let info = ScopeInfo {
                    label,
                    level,
                    group: NodePath::root(),
                    directory,
                    storage_file,
                    started,
                };
                tag_scope_group(&mut *backend, &info, &description)?;
                self.backend = Some(backend);
                info
            }
            Some(parent) => {
                let backend = self.backend_mut()?;
                let group_name = backend.unique_child_name(&parent.group, &name)?;
                let group = backend.create_group(&parent.group, &group_name)?;
                let directory = create_unique_dir(&parent.directory, &name)?;
                let info = ScopeInfo {
                    label,
                    level,
                    group,
                    directory,
                    storage_file: parent.storage_file,
                    started,
                };
                tag_scope_group(backend, &info, &description)?;
                info
            }
        };

        info!(
            experiment = %info.label,
            level = info.level,
            group = %info.group,
            directory = %info.directory.display(),
            "entered experiment scope"
        );
        let this: SharedComponent = experiment.clone();
        self.stack.push(ExperimentScope {
            info,
            pending: vec![this],
        });
        self.current()
    }

    /// Pop the top scope and persist its pending components in registration order.
    ///
    /// The scope is popped even if persisting fails. Every component is attempted;
    /// failures, including the final backend flush, are collected into
    /// [`DaqError::FlushFailed`]. When the last scope exits, the backend is
    /// released. Fails with [`DaqError::EmptyStack`] when no scope is active.
    pub fn exit(&mut self) -> AppResult<ScopeInfo> {
        let scope = self.stack.pop().ok_or(DaqError::EmptyStack)?;
        let mut failures = Vec::new();

        match self.backend.as_deref_mut() {
            Some(backend) => {
                for component in &scope.pending {
                    match component.try_borrow_mut() {
                        Ok(mut component) => {
                            if let Err(err) = component.save(backend, &scope.info) {
                                failures.push(err);
                            }
                        }
                        Err(_) => failures.push(DaqError::ComponentBusy(format!(
                            "component pending in '{}'",
                            scope.info.label
                        ))),
                    }
                }
                if let Err(err) = backend.flush() {
                    failures.push(err);
                }
            }
            None => failures.push(DaqError::Storage(format!(
                "no storage open for scope '{}'",
                scope.info.label
            ))),
        }

        if self.stack.is_empty() {
            self.backend = None;
            debug!(file = %scope.info.storage_file.display(), "storage released");
        }

        info!(
            experiment = %scope.info.label,
            level = scope.info.level,
            persisted = scope.pending.len(),
            failed = failures.len(),
            "exited experiment scope"
        );
        if failures.is_empty() {
            Ok(scope.info)
        } else {
            Err(DaqError::FlushFailed(failures))
        }
    }

    /// Add `component` to the top scope's pending list.
    ///
    /// Returns `false` without changing anything if the component is already
    /// pending in any active scope. Fails with [`DaqError::EmptyStack`] outside
    /// any scope.
    pub fn register<C>(&mut self, component: &Rc<RefCell<C>>) -> AppResult<bool>
    where
        C: Component + 'static,
    {
        let component: SharedComponent = component.clone();
        self.register_shared(component)
    }

    /// [`ExperimentContext::register`] for an already type-erased handle.
    pub fn register_shared(&mut self, component: SharedComponent) -> AppResult<bool> {
        if self.stack.is_empty() {
            return Err(DaqError::EmptyStack);
        }
        if self.is_pending_shared(&component) {
            return Ok(false);
        }
        let scope = self.stack.last_mut().ok_or(DaqError::EmptyStack)?;
        scope.pending.push(component);
        debug!(
            experiment = %scope.info.label,
            pending = scope.pending.len(),
            "component registered"
        );
        Ok(true)
    }

    /// Whether `component` is pending in any active scope.
    pub fn is_pending<C>(&self, component: &Rc<RefCell<C>>) -> bool
    where
        C: Component + 'static,
    {
        let component: SharedComponent = component.clone();
        self.is_pending_shared(&component)
    }

    fn is_pending_shared(&self, component: &SharedComponent) -> bool {
        let target = Rc::as_ptr(component) as *const ();
        self.stack
            .iter()
            .flat_map(|scope| scope.pending.iter())
            .any(|pending| Rc::as_ptr(pending) as *const () == target)
    }

    /// Enter `experiment` and return a guard that exits back to the current
    /// depth when finished or dropped.
    pub fn guard<E>(&mut self, experiment: &Rc<RefCell<E>>) -> AppResult<ScopeGuard<'_>>
    where
        E: Experiment + 'static,
    {
        let depth = self.depth();
        self.enter(experiment)?;
        Ok(ScopeGuard::new(self, depth))
    }

    /// Enter `experiment`, run its script and exit.
    ///
    /// The scope is exited whether the script succeeds, fails or panics; scopes
    /// the script left open are exited first. A script error is returned after
    /// cleanup, with cleanup failures logged.
    pub fn run<E>(&mut self, experiment: &Rc<RefCell<E>>) -> AppResult<ScopeInfo>
    where
        E: Experiment + 'static,
    {
        let mut guard = self.guard(experiment)?;
        let outcome = match experiment.try_borrow_mut() {
            Ok(mut exp) => exp.script(&mut guard),
            Err(_) => Err(DaqError::ComponentBusy("running experiment".into())),
        };
        match outcome {
            Ok(()) => guard.finish(),
            Err(err) => {
                let label = guard.current().map(|s| s.label.clone()).unwrap_or_default();
                if let Err(cleanup) = guard.finish() {
                    error!(experiment = %label, error = %cleanup, "cleanup after failed script");
                }
                Err(err)
            }
        }
    }

    /// Exit scopes until `depth` remain, logging each one as leaked.
    pub(crate) fn unwind_to(&mut self, depth: usize) -> Vec<DaqError> {
        let mut failures = Vec::new();
        while self.stack.len() > depth {
            match self.exit() {
                Ok(info) => {
                    warn!(experiment = %info.label, level = info.level, "closed leaked scope");
                }
                Err(err) => failures.push(err),
            }
        }
        failures
    }
}

impl Drop for ExperimentContext {
    fn drop(&mut self) {
        for failure in self.unwind_to(0) {
            error!(error = %failure, "failed to close scope on drop");
        }
    }
}

fn tag_scope_group(
    backend: &mut dyn StorageBackend,
    info: &ScopeInfo,
    description: &str,
) -> AppResult<()> {
    backend.set_attribute(&info.group, ATTR_CLASSNAME, EXPERIMENT_CLASSNAME)?;
    if !description.is_empty() {
        backend.set_attribute(&info.group, ATTR_DESCRIPTION, description)?;
    }
    backend.set_attribute(&info.group, "label", &info.label)?;
    backend.set_attribute(&info.group, "level", &info.level.to_string())?;
    backend.set_attribute(&info.group, "started", &info.started.to_rfc3339())
}

/// Create `parent/name`, or `parent/name1`, `parent/name2`, ... if taken.
fn create_unique_dir(parent: &Path, name: &str) -> AppResult<PathBuf> {
    let mut candidate = parent.join(name);
    let mut idx = 1usize;
    while candidate.exists() {
        candidate = parent.join(format!("{name}{idx}"));
        idx += 1;
    }
    std::fs::create_dir_all(&candidate).map_err(|err| DaqError::StorageUnavailable {
        path: candidate.clone(),
        reason: err.to_string(),
    })?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeKind;

    struct Probe {
        label: &'static str,
        saves: usize,
    }

    impl Probe {
        fn shared(label: &'static str) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self { label, saves: 0 }))
        }
    }

    impl Component for Probe {
        fn save(&mut self, _: &mut dyn StorageBackend, _: &ScopeInfo) -> AppResult<()> {
            self.saves += 1;
            Ok(())
        }
    }

    impl Experiment for Probe {
        fn label(&self) -> &str {
            self.label
        }

        fn description(&self) -> &str {
            "cooldown run"
        }

        fn script(&mut self, _: &mut ExperimentContext) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn nested_enter_creates_child_group() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let outer = Probe::shared("outer");
        let inner = Probe::shared("inner");

        let root = ctx.enter(&outer).unwrap().clone();
        assert_eq!(root.level, 0);
        assert!(root.group.is_root());
        assert!(root.directory.starts_with(dir.path()));
        assert_eq!(root.storage_file.file_name().unwrap(), "data.json");

        let child = ctx.enter(&inner).unwrap().clone();
        assert_eq!(child.level, 1);
        assert!(child.group.name().starts_with("inner "));
        assert!(child.directory.starts_with(&root.directory));
        assert_eq!(
            ctx.backend().unwrap().node_kind(&child.group).unwrap(),
            Some(NodeKind::Group)
        );
        assert_eq!(
            ctx.backend()
                .unwrap()
                .attribute(&child.group, ATTR_DESCRIPTION)
                .unwrap()
                .as_deref(),
            Some("cooldown run")
        );

        ctx.exit().unwrap();
        assert_eq!(inner.borrow().saves, 1);
        assert_eq!(ctx.current().unwrap().label, "outer");
        ctx.exit().unwrap();
        assert_eq!(outer.borrow().saves, 1);
        assert!(ctx.backend().is_err());
    }

    #[test]
    fn stack_operations_need_a_scope() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        assert!(matches!(ctx.exit(), Err(DaqError::EmptyStack)));
        assert!(matches!(
            ctx.register(&Probe::shared("c")),
            Err(DaqError::EmptyStack)
        ));
        assert!(matches!(ctx.current(), Err(DaqError::EmptyStack)));
    }

    #[test]
    fn register_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let exp = Probe::shared("exp");
        let component = Probe::shared("component");

        ctx.enter(&exp).unwrap();
        assert!(ctx.register(&component).unwrap());
        assert!(!ctx.register(&component).unwrap());
        assert!(!ctx.register(&exp).unwrap());
        assert!(ctx.is_pending(&component));
        assert_eq!(ctx.scopes().next().map(ExperimentScope::pending), Some(2));

        ctx.exit().unwrap();
        assert_eq!(component.borrow().saves, 1);
        assert!(!ctx.is_pending(&component));
    }

    #[test]
    fn busy_component_is_reported_but_scope_pops() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExperimentContext::new(dir.path());
        let exp = Probe::shared("exp");
        let component = Probe::shared("held");
        ctx.enter(&exp).unwrap();
        ctx.register(&component).unwrap();

        let held = component.borrow_mut();
        let err = ctx.exit().unwrap_err();
        drop(held);

        match err {
            DaqError::FlushFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(failures[0], DaqError::ComponentBusy(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.depth(), 0);
        assert_eq!(exp.borrow().saves, 1);
    }

    #[test]
    fn unwritable_base_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut ctx = ExperimentContext::new(&blocker);

        let err = ctx.enter(&Probe::shared("exp")).unwrap_err();
        assert!(matches!(err, DaqError::StorageUnavailable { .. }));
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn colliding_directories_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let first = create_unique_dir(dir.path(), "run").unwrap();
        let second = create_unique_dir(dir.path(), "run").unwrap();
        assert_eq!(first.file_name().unwrap(), "run");
        assert_eq!(second.file_name().unwrap(), "run1");
    }

    #[test]
    fn dropping_context_closes_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let exp = Probe::shared("exp");
        {
            let mut ctx = ExperimentContext::new(dir.path());
            ctx.enter(&exp).unwrap();
        }
        assert_eq!(exp.borrow().saves, 1);
    }
}
