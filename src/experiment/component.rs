//! Data types that can be registered with a scope.

use super::{Component, ScopeInfo};
use crate::data::{Axis, Dataset, LineContainer, SurfaceContainer, VolumeContainer};
use crate::error::AppResult;
use crate::storage::StorageBackend;

impl Component for LineContainer {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        self.persist(backend, &scope.group).map(drop)
    }
}

impl Component for SurfaceContainer {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        self.persist(backend, &scope.group).map(drop)
    }
}

impl Component for VolumeContainer {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        self.persist(backend, &scope.group).map(drop)
    }
}

/// Stored directly in the scope group.
impl Component for Dataset {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        self.persist(backend, &scope.group).map(drop)
    }
}

/// Stored directly in the scope group.
impl Component for Axis {
    fn save(&mut self, backend: &mut dyn StorageBackend, scope: &ScopeInfo) -> AppResult<()> {
        self.persist(backend, &scope.group).map(drop)
    }
}
