//! In-memory storage tree with JSON snapshots.
//!
//! Keeps the whole group/array/attribute tree in a `BTreeMap` keyed by
//! [`NodePath`]. When created with a file path, `flush` serializes the tree with
//! `serde_json`. JSON has no literal for non-finite numbers, so NaN ("not yet
//! written") is stored as `null` and infinities as the strings `"inf"` and
//! `"-inf"`. [`MemoryBackend::load`] reads a snapshot back.

use super::{element_count, validate_member_name, NodeKind, NodePath, StorageBackend};
use crate::error::{AppResult, DaqError};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_FORMAT: &str = "sweep_daq/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Group {
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
    Array {
        shape: Vec<usize>,
        #[serde(with = "non_finite")]
        values: Vec<f64>,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::Group { .. } => NodeKind::Group,
            Node::Array { .. } => NodeKind::Array,
        }
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        match self {
            Node::Group { attributes } | Node::Array { attributes, .. } => attributes,
        }
    }

    fn attributes_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Node::Group { attributes } | Node::Array { attributes, .. } => attributes,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: String,
    nodes: BTreeMap<NodePath, Node>,
}

/// Storage tree held in memory, optionally snapshotted to a JSON file.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    path: Option<PathBuf>,
    nodes: BTreeMap<NodePath, Node>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Purely in-memory tree; `flush` is a no-op.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodePath::root(),
            Node::Group {
                attributes: BTreeMap::new(),
            },
        );
        Self { path: None, nodes }
    }

    /// Tree backed by a snapshot file at `path`.
    ///
    /// An empty snapshot is written immediately so an unwritable location is
    /// reported up front as [`DaqError::StorageUnavailable`].
    pub fn create(path: &Path) -> AppResult<Self> {
        let mut backend = Self::new();
        backend.path = Some(path.to_path_buf());
        backend
            .write_snapshot()
            .map_err(|err| DaqError::StorageUnavailable {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        Ok(backend)
    }

    /// Reload a snapshot previously written by [`StorageBackend::flush`].
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&text)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(DaqError::Storage(format!(
                "unsupported snapshot format '{}'",
                snapshot.format
            )));
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            nodes: snapshot.nodes,
        })
    }

    fn write_snapshot(&self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            nodes: self.nodes.clone(),
        };
        let text = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, text)?;
        debug!(path = %path.display(), nodes = self.nodes.len(), "wrote storage snapshot");
        Ok(())
    }

    fn node(&self, path: &NodePath) -> AppResult<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| DaqError::Storage(format!("no node at '{path}'")))
    }

    fn insert_child(&mut self, parent: &NodePath, name: &str, node: Node) -> AppResult<NodePath> {
        validate_member_name(name)?;
        match self.nodes.get(parent) {
            Some(Node::Group { .. }) => {}
            Some(Node::Array { .. }) => {
                return Err(DaqError::Storage(format!("'{parent}' is not a group")))
            }
            None => return Err(DaqError::Storage(format!("no group at '{parent}'"))),
        }
        let path = parent.join(name);
        if self.nodes.contains_key(&path) {
            return Err(DaqError::Storage(format!("'{path}' already exists")));
        }
        self.nodes.insert(path.clone(), node);
        Ok(path)
    }
}

impl StorageBackend for MemoryBackend {
    fn location(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn create_group(&mut self, parent: &NodePath, name: &str) -> AppResult<NodePath> {
        self.insert_child(
            parent,
            name,
            Node::Group {
                attributes: BTreeMap::new(),
            },
        )
    }

    fn create_array(
        &mut self,
        parent: &NodePath,
        name: &str,
        shape: &[usize],
    ) -> AppResult<NodePath> {
        let len = element_count(shape)?;
        self.insert_child(
            parent,
            name,
            Node::Array {
                shape: shape.to_vec(),
                values: vec![f64::NAN; len],
                attributes: BTreeMap::new(),
            },
        )
    }

    fn write(&mut self, array: &NodePath, data: ArrayViewD<'_, f64>) -> AppResult<()> {
        match self.nodes.get_mut(array) {
            Some(Node::Array { shape, values, .. }) => {
                if shape.as_slice() != data.shape() {
                    return Err(DaqError::ShapeMismatch {
                        path: array.to_string(),
                        expected: data.shape().to_vec(),
                        found: shape.clone(),
                    });
                }
                values.clear();
                values.extend(data.iter().copied());
                Ok(())
            }
            Some(Node::Group { .. }) => Err(DaqError::Storage(format!("'{array}' is a group"))),
            None => Err(DaqError::Storage(format!("no array at '{array}'"))),
        }
    }

    fn set_attribute(&mut self, node: &NodePath, key: &str, value: &str) -> AppResult<()> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| DaqError::Storage(format!("no node at '{node}'")))?;
        entry
            .attributes_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn node_kind(&self, path: &NodePath) -> AppResult<Option<NodeKind>> {
        Ok(self.nodes.get(path).map(Node::kind))
    }

    fn children(&self, group: &NodePath) -> AppResult<Vec<String>> {
        if self.node(group)?.kind() != NodeKind::Group {
            return Err(DaqError::Storage(format!("'{group}' is not a group")));
        }
        Ok(self
            .nodes
            .keys()
            .filter(|path| path.parent().as_ref() == Some(group))
            .map(|path| path.name().to_string())
            .collect())
    }

    fn attribute(&self, node: &NodePath, key: &str) -> AppResult<Option<String>> {
        Ok(self.node(node)?.attributes().get(key).cloned())
    }

    fn shape(&self, array: &NodePath) -> AppResult<Vec<usize>> {
        match self.node(array)? {
            Node::Array { shape, .. } => Ok(shape.clone()),
            Node::Group { .. } => Err(DaqError::Storage(format!("'{array}' is a group"))),
        }
    }

    fn read(&self, array: &NodePath) -> AppResult<ArrayD<f64>> {
        match self.node(array)? {
            Node::Array { shape, values, .. } => {
                ArrayD::from_shape_vec(IxDyn(shape), values.clone())
                    .map_err(|err| DaqError::Storage(format!("corrupt array '{array}': {err}")))
            }
            Node::Group { .. } => Err(DaqError::Storage(format!("'{array}' is a group"))),
        }
    }

    fn flush(&mut self) -> AppResult<()> {
        self.write_snapshot()
    }
}

/// JSON encoding of array values: NaN as `null`, infinities as `"inf"`/`"-inf"`.
mod non_finite {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Option<Value>> = values
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    None
                } else if v.is_infinite() {
                    let text = if v > 0.0 { "inf" } else { "-inf" };
                    Some(Value::Text(text.to_string()))
                } else {
                    Some(Value::Number(v))
                }
            })
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let encoded = Vec::<Option<Value>>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|v| match v {
                None => Ok(f64::NAN),
                Some(Value::Number(v)) => Ok(v),
                Some(Value::Text(text)) => match text.as_str() {
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    "nan" => Ok(f64::NAN),
                    other => Err(D::Error::custom(format!("invalid array value '{other}'"))),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn create_array_is_nan_filled() {
        let mut backend = MemoryBackend::new();
        let arr = backend
            .create_array(&NodePath::root(), "mag", &[2, 3])
            .unwrap();
        let data = backend.read(&arr).unwrap();
        assert_eq!(data.shape(), &[2, 3]);
        assert!(data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn oversized_shape_is_rejected() {
        let mut backend = MemoryBackend::new();
        let root = NodePath::root();
        let err = backend
            .create_array(&root, "huge", &[usize::MAX, 2])
            .unwrap_err();
        assert!(matches!(err, DaqError::Storage(_)));
        assert!(!backend.contains(&root, "huge").unwrap());
    }

    #[test]
    fn write_rejects_shape_change() {
        let mut backend = MemoryBackend::new();
        let arr = backend
            .create_array(&NodePath::root(), "mag", &[3])
            .unwrap();
        let err = backend
            .write(&arr, array![1.0, 2.0].into_dyn().view())
            .unwrap_err();
        assert!(matches!(err, DaqError::ShapeMismatch { .. }));
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let mut backend = MemoryBackend::new();
        backend.create_group(&NodePath::root(), "a").unwrap();
        assert!(backend.create_group(&NodePath::root(), "a").is_err());
        assert!(backend
            .create_array(&NodePath::root().join("missing"), "x", &[1])
            .is_err());
    }

    #[test]
    fn children_lists_direct_members_only() {
        let mut backend = MemoryBackend::new();
        let root = NodePath::root();
        let group = backend.create_group(&root, "outer").unwrap();
        backend.create_group(&group, "inner").unwrap();
        backend.create_array(&group, "z", &[1]).unwrap();

        assert_eq!(backend.children(&root).unwrap(), vec!["outer".to_string()]);
        assert_eq!(
            backend.children(&group).unwrap(),
            vec!["inner".to_string(), "z".to_string()]
        );
    }

    #[test]
    fn snapshot_round_trip_preserves_non_finite_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut backend = MemoryBackend::create(&path).unwrap();
        let arr = backend
            .create_array(&NodePath::root(), "mag", &[5])
            .unwrap();
        let written = array![1.5, f64::NAN, -2.0, f64::INFINITY, f64::NEG_INFINITY];
        backend.write(&arr, written.into_dyn().view()).unwrap();
        backend.set_attribute(&arr, "unit", "dB").unwrap();
        backend.flush().unwrap();

        let reloaded = MemoryBackend::load(&path).unwrap();
        let data = reloaded.read(&arr).unwrap();
        assert_eq!(data[[0]], 1.5);
        assert!(data[[1]].is_nan());
        assert_eq!(data[[2]], -2.0);
        assert_eq!(data[[3]], f64::INFINITY);
        assert_eq!(data[[4]], f64::NEG_INFINITY);
        assert_eq!(
            reloaded.attribute(&arr, "unit").unwrap().as_deref(),
            Some("dB")
        );
    }

    #[test]
    fn unknown_text_value_fails_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut backend = MemoryBackend::create(&path).unwrap();
        let arr = backend
            .create_array(&NodePath::root(), "mag", &[1])
            .unwrap();
        backend.write(&arr, array![f64::INFINITY].into_dyn().view()).unwrap();
        backend.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"inf\""));
        std::fs::write(&path, text.replace("\"inf\"", "\"huge\"")).unwrap();
        assert!(MemoryBackend::load(&path).is_err());
    }

    #[test]
    fn unwritable_location_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("data.json");
        let err = MemoryBackend::create(&path).unwrap_err();
        assert!(matches!(err, DaqError::StorageUnavailable { .. }));
    }
}
