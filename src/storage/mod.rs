//! Hierarchical storage backends.
//!
//! Containers and experiment scopes persist through the [`StorageBackend`] trait,
//! which models a group/array/attribute tree in the manner of HDF5:
//!
//! ```text
//! /                               (file root, level-0 scope)
//! └── VNA trace                   group, classname = "LineContainer"
//!     ├── freq                    f64 array + label/unit/description/identity
//!     └── mag                     f64 array + label/unit/description/identity
//! ```
//!
//! Two implementations exist:
//!
//! - [`MemoryBackend`]: an in-memory tree that snapshots to JSON on `flush`.
//! - `Hdf5Backend` (feature `storage_hdf5`): an HDF5 file via `hdf5-metno`.
//!
//! Handles are absolute [`NodePath`]s so they can be cloned freely and carried by
//! experiment scopes without borrowing the backend.

pub mod memory;

#[cfg(feature = "storage_hdf5")]
pub mod hdf5_file;

use crate::error::{AppResult, DaqError};
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use memory::MemoryBackend;

#[cfg(feature = "storage_hdf5")]
pub use hdf5_file::Hdf5Backend;

/// Attribute holding the stable identity of an array or axis.
pub const ATTR_IDENTITY: &str = "identity";
/// Attribute holding the container kind of a group.
pub const ATTR_CLASSNAME: &str = "classname";
/// Attribute holding a free-form description.
pub const ATTR_DESCRIPTION: &str = "description";
/// Attribute holding a dataset label.
pub const ATTR_LABEL: &str = "label";
/// Attribute holding a dataset unit.
pub const ATTR_UNIT: &str = "unit";

/// Absolute, `/`-separated location of a node in a storage tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// The root group.
    pub fn root() -> Self {
        NodePath("/".to_string())
    }

    /// Whether this is the root group.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path of the child `name` below this node.
    pub fn join(&self, name: &str) -> Self {
        if self.is_root() {
            NodePath(format!("/{name}"))
        } else {
            NodePath(format!("{}/{name}", self.0))
        }
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Enclosing group, `None` for the root.
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(NodePath::root()),
            Some(idx) => Some(NodePath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Nesting depth below the root (root is 0).
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of node found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A group that can hold arrays and other groups.
    Group,
    /// An N-D `f64` array.
    Array,
}

/// On-disk format for an experiment's storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// [`MemoryBackend`] with a JSON snapshot.
    #[default]
    Json,
    /// HDF5 file (requires the `storage_hdf5` feature).
    Hdf5,
}

impl StorageFormat {
    /// File extension used for the storage file.
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Hdf5 => "hdf5",
        }
    }

    /// Parse a format name as used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(StorageFormat::Json),
            "hdf5" | "h5" => Some(StorageFormat::Hdf5),
            _ => None,
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFormat::Json => write!(f, "json"),
            StorageFormat::Hdf5 => write!(f, "hdf5"),
        }
    }
}

/// Group/array/attribute storage consumed by containers and the experiment stack.
///
/// The four write operations mirror the collaborator interface of an HDF5-like
/// file. The read side exists so that persistence can be idempotent (find and
/// overwrite an existing entry) and so stored data can be reloaded.
pub trait StorageBackend {
    /// File backing this tree, if any.
    fn location(&self) -> Option<&Path>;

    /// Create group `name` inside `parent`. Fails if the name is taken.
    fn create_group(&mut self, parent: &NodePath, name: &str) -> AppResult<NodePath>;

    /// Create a NaN-filled `f64` array `name` of `shape` inside `parent`.
    fn create_array(&mut self, parent: &NodePath, name: &str, shape: &[usize])
        -> AppResult<NodePath>;

    /// Overwrite the full contents of an existing array. Shapes must match exactly.
    fn write(&mut self, array: &NodePath, data: ArrayViewD<'_, f64>) -> AppResult<()>;

    /// Set (or replace) a string attribute on a group or array.
    fn set_attribute(&mut self, node: &NodePath, key: &str, value: &str) -> AppResult<()>;

    /// Kind of node at `path`, `None` if nothing exists there.
    fn node_kind(&self, path: &NodePath) -> AppResult<Option<NodeKind>>;

    /// Names of the direct members of `group`.
    fn children(&self, group: &NodePath) -> AppResult<Vec<String>>;

    /// Read a string attribute, `None` if absent.
    fn attribute(&self, node: &NodePath, key: &str) -> AppResult<Option<String>>;

    /// Shape of an existing array.
    fn shape(&self, array: &NodePath) -> AppResult<Vec<usize>>;

    /// Read an array back into memory.
    fn read(&self, array: &NodePath) -> AppResult<ArrayD<f64>>;

    /// Push buffered state to the backing file.
    fn flush(&mut self) -> AppResult<()>;

    /// Whether `group` has a member called `name`.
    fn contains(&self, group: &NodePath, name: &str) -> AppResult<bool> {
        Ok(self.node_kind(&group.join(name))?.is_some())
    }

    /// First free member name of `group` derived from `base`.
    ///
    /// `base` itself if free, otherwise `base1`, `base2`, ... in order.
    fn unique_child_name(&self, group: &NodePath, base: &str) -> AppResult<String> {
        if !self.contains(group, base)? {
            return Ok(base.to_string());
        }
        let mut idx = 1usize;
        loop {
            let candidate = format!("{base}{idx}");
            if !self.contains(group, &candidate)? {
                return Ok(candidate);
            }
            idx += 1;
        }
    }

    /// Member of `group` of the given kind whose `identity` attribute equals `identity`.
    fn find_by_identity(
        &self,
        group: &NodePath,
        identity: &str,
        kind: NodeKind,
    ) -> AppResult<Option<NodePath>> {
        for name in self.children(group)? {
            let path = group.join(&name);
            if self.node_kind(&path)? != Some(kind) {
                continue;
            }
            if self.attribute(&path, ATTR_IDENTITY)?.as_deref() == Some(identity) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// Rejects member names the hierarchical formats cannot represent.
pub(crate) fn validate_member_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name == "." || name.contains('/') {
        return Err(DaqError::Storage(format!("invalid member name '{name}'")));
    }
    Ok(())
}

/// Number of elements of an array of `shape`, rejecting shapes that overflow `usize`.
pub(crate) fn element_count(shape: &[usize]) -> AppResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| DaqError::Storage(format!("array shape {shape:?} is too large")))
}

/// Create a fresh storage file of the requested format at `path`.
///
/// Fails with [`DaqError::StorageUnavailable`] if the file cannot be created and
/// with [`DaqError::FeatureNotEnabled`] if the format was not compiled in.
pub fn open_backend(format: StorageFormat, path: &Path) -> AppResult<Box<dyn StorageBackend>> {
    match format {
        StorageFormat::Json => Ok(Box::new(MemoryBackend::create(path)?)),
        #[cfg(feature = "storage_hdf5")]
        StorageFormat::Hdf5 => Ok(Box::new(Hdf5Backend::create(path)?)),
        #[cfg(not(feature = "storage_hdf5"))]
        StorageFormat::Hdf5 => Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string())),
    }
}
