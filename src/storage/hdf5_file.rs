//! HDF5 storage backend.
//!
//! Maps the storage tree 1:1 onto an HDF5 file: groups are HDF5 groups, arrays
//! are `f64` datasets and attributes are variable-length unicode scalars, so the
//! file opens directly in Python/MATLAB/Igor.
//!
//! HDF5 attributes cannot be overwritten, so `set_attribute` deletes and
//! recreates them, the same way run annotations are rewritten.

use super::{element_count, validate_member_name, NodeKind, NodePath, StorageBackend};
use crate::error::{AppResult, DaqError};
use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Location};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage tree backed by an HDF5 file.
pub struct Hdf5Backend {
    file: File,
    path: PathBuf,
}

impl Hdf5Backend {
    /// Create (truncate) an HDF5 file at `path`.
    pub fn create(path: &Path) -> AppResult<Self> {
        let file = File::create(path).map_err(|err| DaqError::StorageUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        debug!(path = %path.display(), "created HDF5 storage file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing HDF5 file for reading and writing.
    pub fn open(path: &Path) -> AppResult<Self> {
        let file = File::open_rw(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    fn group(&self, path: &NodePath) -> AppResult<Group> {
        if path.is_root() {
            Ok(self.file.as_group()?)
        } else {
            Ok(self.file.group(path.as_str())?)
        }
    }

    fn with_location<T>(
        &self,
        node: &NodePath,
        f: impl FnOnce(&Location) -> AppResult<T>,
    ) -> AppResult<T> {
        match self.node_kind(node)? {
            Some(NodeKind::Group) => f(&self.group(node)?),
            Some(NodeKind::Array) => f(&self.file.dataset(node.as_str())?),
            None => Err(DaqError::Storage(format!("no node at '{node}'"))),
        }
    }
}

impl StorageBackend for Hdf5Backend {
    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn create_group(&mut self, parent: &NodePath, name: &str) -> AppResult<NodePath> {
        validate_member_name(name)?;
        self.group(parent)?.create_group(name)?;
        Ok(parent.join(name))
    }

    fn create_array(
        &mut self,
        parent: &NodePath,
        name: &str,
        shape: &[usize],
    ) -> AppResult<NodePath> {
        validate_member_name(name)?;
        let len = element_count(shape)?;
        let dataset = self
            .group(parent)?
            .new_dataset::<f64>()
            .shape(shape.to_vec())
            .create(name)?;
        dataset.write_raw(&vec![f64::NAN; len])?;
        Ok(parent.join(name))
    }

    fn write(&mut self, array: &NodePath, data: ArrayViewD<'_, f64>) -> AppResult<()> {
        let dataset = self.file.dataset(array.as_str())?;
        let found = dataset.shape();
        if found.as_slice() != data.shape() {
            return Err(DaqError::ShapeMismatch {
                path: array.to_string(),
                expected: data.shape().to_vec(),
                found,
            });
        }
        // Logical iteration order is row-major, matching the dataset layout.
        let flat: Vec<f64> = data.iter().copied().collect();
        dataset.write_raw(&flat)?;
        Ok(())
    }

    fn set_attribute(&mut self, node: &NodePath, key: &str, value: &str) -> AppResult<()> {
        let value = value
            .parse::<VarLenUnicode>()
            .map_err(|err| DaqError::Storage(format!("attribute '{key}': {err}")))?;
        self.with_location(node, |loc| {
            if loc.attr_names()?.iter().any(|name| name == key) {
                loc.delete_attr(key)?;
            }
            loc.new_attr::<VarLenUnicode>()
                .create(key)?
                .write_scalar(&value)?;
            Ok(())
        })
    }

    fn node_kind(&self, path: &NodePath) -> AppResult<Option<NodeKind>> {
        if path.is_root() {
            return Ok(Some(NodeKind::Group));
        }
        if !self.file.link_exists(path.as_str()) {
            return Ok(None);
        }
        if self.file.group(path.as_str()).is_ok() {
            Ok(Some(NodeKind::Group))
        } else {
            Ok(Some(NodeKind::Array))
        }
    }

    fn children(&self, group: &NodePath) -> AppResult<Vec<String>> {
        Ok(self.group(group)?.member_names()?)
    }

    fn attribute(&self, node: &NodePath, key: &str) -> AppResult<Option<String>> {
        self.with_location(node, |loc| {
            if !loc.attr_names()?.iter().any(|name| name == key) {
                return Ok(None);
            }
            let value = loc.attr(key)?.read_scalar::<VarLenUnicode>()?;
            Ok(Some(value.to_string()))
        })
    }

    fn shape(&self, array: &NodePath) -> AppResult<Vec<usize>> {
        Ok(self.file.dataset(array.as_str())?.shape())
    }

    fn read(&self, array: &NodePath) -> AppResult<ArrayD<f64>> {
        let dataset = self.file.dataset(array.as_str())?;
        let shape = dataset.shape();
        let values = dataset.read_raw::<f64>()?;
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|err| DaqError::Storage(format!("corrupt array '{array}': {err}")))
    }

    fn flush(&mut self) -> AppResult<()> {
        self.file.flush()?;
        Ok(())
    }
}
