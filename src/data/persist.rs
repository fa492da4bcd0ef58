//! Shared persistence helpers for buffers and containers.

use super::meta::{storage_safe, Metadata};
use crate::error::{AppResult, DaqError};
use crate::storage::{
    NodeKind, NodePath, StorageBackend, ATTR_CLASSNAME, ATTR_DESCRIPTION, ATTR_IDENTITY,
    ATTR_LABEL, ATTR_UNIT,
};
use ndarray::ArrayViewD;
use tracing::trace;
use uuid::Uuid;

/// Write `data` as the array for `meta` inside `group`.
///
/// Reuses the member carrying the same identity when there is one; otherwise
/// creates a new member named after the label (numeric suffix on collision).
pub(crate) fn persist_array(
    backend: &mut dyn StorageBackend,
    group: &NodePath,
    meta: &Metadata,
    data: ArrayViewD<'_, f64>,
) -> AppResult<NodePath> {
    let identity = meta.id().to_string();

    if let Some(existing) = backend.find_by_identity(group, &identity, NodeKind::Array)? {
        let found = backend.shape(&existing)?;
        if found.as_slice() != data.shape() {
            return Err(DaqError::ShapeMismatch {
                path: existing.to_string(),
                expected: data.shape().to_vec(),
                found,
            });
        }
        backend.write(&existing, data)?;
        trace!(path = %existing, "overwrote stored array");
        return Ok(existing);
    }

    let name = backend.unique_child_name(group, &meta.storage_name())?;
    let path = backend.create_array(group, &name, data.shape())?;
    backend.write(&path, data)?;
    backend.set_attribute(&path, ATTR_LABEL, meta.label())?;
    backend.set_attribute(&path, ATTR_UNIT, meta.unit())?;
    backend.set_attribute(&path, ATTR_DESCRIPTION, meta.description())?;
    backend.set_attribute(&path, ATTR_IDENTITY, &identity)?;
    trace!(path = %path, "created stored array");
    Ok(path)
}

/// Find or create the sub-group a container persists into.
///
/// A group inside `parent` tagged with the container's identity is reused, so
/// re-persisting overwrites in place. A new group is named after the container,
/// with a numeric suffix if the name is taken, and tagged with `classname`, the
/// optional description and the identity.
pub(crate) fn prepare_group(
    backend: &mut dyn StorageBackend,
    parent: &NodePath,
    id: Uuid,
    name: &str,
    classname: &str,
    description: &str,
) -> AppResult<NodePath> {
    let identity = id.to_string();
    if let Some(existing) = backend.find_by_identity(parent, &identity, NodeKind::Group)? {
        return Ok(existing);
    }

    let label = backend.unique_child_name(parent, &storage_safe(name, classname))?;
    let group = backend.create_group(parent, &label)?;
    backend.set_attribute(&group, ATTR_CLASSNAME, classname)?;
    if !description.is_empty() {
        backend.set_attribute(&group, ATTR_DESCRIPTION, description)?;
    }
    backend.set_attribute(&group, ATTR_IDENTITY, &identity)?;
    Ok(group)
}
