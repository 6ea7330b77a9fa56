use thiserror::Error;

use crate::model::{GridDimensions, RelationMode};

/// Failure modes of the grid engine. None of them are fatal: each one degrades to
/// "edits stay local until the next successful flush or reconnect".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("no grid stored for case {case_id} ({mode})")]
    NotFound { case_id: String, mode: RelationMode },
    #[error("stored grid is {found} but the case currently needs {expected}")]
    DimensionMismatch {
        expected: GridDimensions,
        found: GridDimensions,
    },
    #[error("grid persistence failed: {0}")]
    PersistenceFailure(String),
    #[error("grid connection lost: {0}")]
    ConnectionLost(String),
    #[error("unknown relation mode {0:?}")]
    UnknownMode(String),
    #[error("invalid cell key {0:?}")]
    InvalidCellKey(String),
}

impl GridError {
    pub fn not_found(case_id: &str, mode: RelationMode) -> Self {
        Self::NotFound {
            case_id: case_id.to_string(),
            mode,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
