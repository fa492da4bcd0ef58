//! Nested experiment scopes, registration and cleanup on failure.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use sweep_daq::data::{shared, Accumulator, Axis, LineContainer, Shared, SurfaceContainer};
use sweep_daq::experiment::{Component, Experiment, ExperimentContext, ScopeInfo};
use sweep_daq::storage::{MemoryBackend, NodeKind, NodePath, StorageBackend};
use sweep_daq::{AppResult, DaqError};

/// Experiment whose script is supplied by the test.
struct Scripted {
    label: String,
    body: Box<dyn FnMut(&mut ExperimentContext) -> AppResult<()>>,
}

impl Scripted {
    fn new(
        label: &str,
        body: impl FnMut(&mut ExperimentContext) -> AppResult<()> + 'static,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            label: label.to_string(),
            body: Box::new(body),
        }))
    }
}

impl Component for Scripted {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        backend.set_attribute(&scope.group, "script", &self.label)
    }
}

impl Experiment for Scripted {
    fn label(&self) -> &str {
        &self.label
    }

    fn description(&self) -> &str {
        "scripted test experiment"
    }

    fn script(&mut self, ctx: &mut ExperimentContext) -> AppResult<()> {
        (self.body)(ctx)
    }
}

fn trace() -> Shared<LineContainer> {
    let freq = Axis::from_values("freq", "Hz", &[1.0, 2.0, 3.0]).unwrap();
    shared(LineContainer::new("VNA trace", &freq, "mag", "dB", "").unwrap())
}

fn find_child(backend: &MemoryBackend, group: &NodePath, prefix: &str) -> NodePath {
    let name = backend
        .children(group)
        .unwrap()
        .into_iter()
        .find(|name| name.starts_with(prefix))
        .unwrap();
    group.join(&name)
}

#[test]
fn test_nested_register_persists_under_inner_scope() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let a = Scripted::new("A", |_| Ok(()));
    let b = Scripted::new("B", |_| Ok(()));
    let c = trace();
    c.borrow_mut().replace_dependent(&[0.1, 0.2, 0.3]).unwrap();

    ctx.enter(&a).unwrap();
    ctx.enter(&b).unwrap();
    ctx.register(&c).unwrap();
    let inner = ctx.exit().unwrap();
    assert_eq!(inner.level, 1);
    let outer = ctx.exit().unwrap();
    assert_eq!(ctx.depth(), 0);
    assert!(matches!(ctx.exit(), Err(DaqError::EmptyStack)));

    let stored = MemoryBackend::load(&outer.storage_file).unwrap();
    let b_group = find_child(&stored, &NodePath::root(), "B ");
    assert_eq!(b_group, inner.group);
    assert_eq!(
        stored.node_kind(&b_group.join("VNA trace")).unwrap(),
        Some(NodeKind::Group)
    );
    assert_eq!(
        stored.node_kind(&NodePath::root().join("VNA trace")).unwrap(),
        None
    );
    let mag = stored.read(&b_group.join("VNA trace").join("mag")).unwrap();
    assert_eq!(mag[[2]], 0.3);
}

#[test]
fn test_scope_groups_carry_experiment_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let outer = Scripted::new("sweep", |_| Ok(()));
    let inner = Scripted::new("power", |_| Ok(()));

    ctx.enter(&outer).unwrap();
    ctx.enter(&inner).unwrap();
    let info = ctx.exit().unwrap();
    let root = ctx.exit().unwrap();

    let stored = MemoryBackend::load(&root.storage_file).unwrap();
    let attr = |path: &NodePath, key: &str| stored.attribute(path, key).unwrap();
    assert_eq!(attr(&info.group, "classname").as_deref(), Some("Experiment"));
    assert_eq!(attr(&info.group, "level").as_deref(), Some("1"));
    assert_eq!(attr(&info.group, "script").as_deref(), Some("power"));
    assert_eq!(
        attr(&info.group, "description").as_deref(),
        Some("scripted test experiment")
    );
    assert_eq!(attr(&NodePath::root(), "script").as_deref(), Some("sweep"));
    assert!(attr(&NodePath::root(), "started").is_some());

    assert!(root.directory.is_dir());
    assert!(info.directory.is_dir());
    assert_eq!(info.directory.parent(), Some(root.directory.as_path()));
    assert!(root
        .directory
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("sweep ")));
}

#[test]
fn test_run_nests_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let line = trace();
    let captured = line.clone();

    let root = Scripted::new("power sweep", move |ctx| {
        let line = captured.clone();
        let step = Scripted::new("trace", move |ctx| {
            ctx.register(&line)?;
            line.borrow_mut().replace_dependent(&[1.0, 2.0, 3.0])
        });
        ctx.run(&step)?;
        assert_eq!(ctx.depth(), 1);
        Ok(())
    });

    let info = ctx.run(&root).unwrap();
    assert_eq!(ctx.depth(), 0);

    let stored = MemoryBackend::load(&info.storage_file).unwrap();
    let step = find_child(&stored, &NodePath::root(), "trace ");
    assert!(stored.contains(&step, "VNA trace").unwrap());
    assert_eq!(line.borrow().dependent().written(), 3);
}

#[test]
fn test_failed_script_still_releases_scope() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let line = trace();
    let captured = line.clone();

    let failing = Scripted::new("broken", move |ctx| {
        ctx.register(&captured)?;
        let inner = Scripted::new("left open", |_| Ok(()));
        ctx.enter(&inner)?;
        captured.borrow_mut().append(1.0, None)?;
        Err(DaqError::ContainerFull {
            name: "instrument".into(),
        })
    });

    let err = ctx.run(&failing).unwrap_err();
    assert!(matches!(err, DaqError::ContainerFull { .. }));
    assert_eq!(ctx.depth(), 0);
    assert!(matches!(ctx.current(), Err(DaqError::EmptyStack)));

    // The stack is usable again and the partially filled line was persisted.
    let file = dir.path().read_dir().unwrap().next().unwrap().unwrap().path();
    let stored = MemoryBackend::load(&file.join("data.json")).unwrap();
    let mag = stored
        .read(&NodePath::root().join("VNA trace").join("mag"))
        .unwrap();
    assert_eq!(mag[[0]], 1.0);
    assert!(mag[[1]].is_nan());

    ctx.run(&Scripted::new("next", |_| Ok(()))).unwrap();
}

#[test]
fn test_panicking_script_unwinds_stack() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let line = trace();
    let captured = line.clone();

    let panicking = Scripted::new("panics", move |ctx| {
        ctx.register(&captured)?;
        panic!("instrument driver crashed");
    });

    let result = panic::catch_unwind(AssertUnwindSafe(|| ctx.run(&panicking)));
    assert!(result.is_err());
    assert_eq!(ctx.depth(), 0);
    assert!(!ctx.is_pending(&line));
}

#[test]
fn test_register_targets_top_scope_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let outer = Scripted::new("outer", |_| Ok(()));
    let inner = Scripted::new("inner", |_| Ok(()));
    let line = trace();

    ctx.enter(&outer).unwrap();
    assert!(ctx.register(&line).unwrap());
    ctx.enter(&inner).unwrap();
    assert!(!ctx.register(&line).unwrap());
    let pending: Vec<usize> = ctx.scopes().map(|scope| scope.pending()).collect();
    assert_eq!(pending, vec![2, 1]);

    ctx.exit().unwrap();
    let root = ctx.exit().unwrap();
    let stored = MemoryBackend::load(&root.storage_file).unwrap();
    assert!(stored.contains(&NodePath::root(), "VNA trace").unwrap());
}

#[test]
fn test_linked_containers_persist_together() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ExperimentContext::new(dir.path());
    let exp = Scripted::new("map", |_| Ok(()));
    let line = trace();
    let power = Axis::from_values("power", "dBm", &[-10.0, 0.0]).unwrap();
    let surface = SurfaceContainer::linked("S21 map", &power, &line).unwrap();

    ctx.enter(&exp).unwrap();
    ctx.register(&line).unwrap();
    ctx.register(&surface).unwrap();
    for offset in [0.0, 1.0] {
        line.borrow_mut().reset();
        for i in 0..3 {
            line.borrow_mut().append(offset + f64::from(i), None).unwrap();
        }
    }
    let root = ctx.exit().unwrap();

    let stored = MemoryBackend::load(&root.storage_file).unwrap();
    let z = stored
        .read(&NodePath::root().join("S21 map").join("mag"))
        .unwrap();
    assert_eq!(z.shape(), &[3, 2]);
    assert_eq!(z[[2, 1]], 3.0);
}

#[test]
fn test_unwritable_base_dir_fails_enter() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not a directory");
    std::fs::write(&blocker, b"").unwrap();
    let mut ctx = ExperimentContext::new(&blocker);

    let err = ctx.run(&Scripted::new("exp", |_| Ok(()))).unwrap_err();
    assert!(matches!(err, DaqError::StorageUnavailable { .. }));
    assert_eq!(ctx.depth(), 0);
}
