use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GridError;
use crate::model::{GridSnapshot, RelationMode};

/// Last-writer-wins register of grid snapshots keyed by `(case_id, mode)`.
///
/// `upsert` is the only write path and always replaces the whole cell map.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Fails with [`GridError::NotFound`] when nothing has been stored for the key yet.
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError>;

    /// Create-or-replace. Returns the snapshot as persisted.
    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError>;
}

#[async_trait]
impl<T: GridStore + ?Sized> GridStore for Arc<T> {
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
        (**self).load(case_id, mode).await
    }

    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        (**self).upsert(snapshot).await
    }
}
