//! Descriptive metadata shared by axes, datasets and containers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label, unit, description and stable identity of a buffer.
///
/// The identity is assigned at construction and never changes; deep copies get
/// a fresh one. Storage uses it to find and overwrite an existing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    label: String,
    unit: String,
    description: String,
    id: Uuid,
}

impl Metadata {
    /// New metadata with a fresh identity.
    pub fn new(
        label: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            description: description.into(),
            id: Uuid::new_v4(),
        }
    }

    /// Same text, fresh identity.
    pub fn renewed(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Short name of the quantity (e.g. `freq`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Physical unit (e.g. `Hz`), possibly empty.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Free-form description, possibly empty.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stable identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Plot-facing label: `label [unit]`, or just `label` without a unit.
    pub fn axis_label(&self) -> String {
        if self.unit.is_empty() {
            self.label.clone()
        } else {
            format!("{} [{}]", self.label, self.unit)
        }
    }

    /// Name used for the storage entry. Falls back to `data` for unlabelled
    /// buffers and replaces path separators.
    pub(crate) fn storage_name(&self) -> String {
        storage_safe(&self.label, "data")
    }

    pub(crate) fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub(crate) fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    pub(crate) fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }
}

/// Map a free-form name onto a valid storage member name.
pub(crate) fn storage_safe(name: &str, fallback: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." {
        fallback.to_string()
    } else {
        trimmed.replace('/', "_")
    }
}
