use serde::{Deserialize, Serialize};

use crate::model::{Cells, GridSnapshot, RelationMode};

/// Body of `GET` and `POST` grid responses. An absent record is `{rows:0, cols:0, cells:{}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPayload {
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub cells: Cells,
}

impl GridPayload {
    pub fn is_absent(&self) -> bool {
        self.rows == 0 && self.cols == 0 && self.cells.is_empty()
    }

    pub fn into_snapshot(self, case_id: impl Into<String>, mode: RelationMode) -> GridSnapshot {
        GridSnapshot {
            case_id: case_id.into(),
            mode,
            rows: self.rows,
            cols: self.cols,
            cells: self.cells,
        }
    }
}

impl From<GridSnapshot> for GridPayload {
    fn from(snapshot: GridSnapshot) -> Self {
        Self {
            rows: snapshot.rows,
            cols: snapshot.cols,
            cells: snapshot.cells,
        }
    }
}

/// Body of a grid upsert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWrite {
    pub mode: RelationMode,
    pub rows: usize,
    pub cols: usize,
    pub cells: Cells,
}

impl From<&GridSnapshot> for GridWrite {
    fn from(snapshot: &GridSnapshot) -> Self {
        Self {
            mode: snapshot.mode,
            rows: snapshot.rows,
            cols: snapshot.cols,
            cells: snapshot.cells.clone(),
        }
    }
}

/// Messages pushed to every connected viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "grid:update")]
    GridUpdate(GridSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellState, GridDimensions};

    #[test_timeout::timeout]
    fn grid_update_event_is_flat_and_tagged() {
        let mut snapshot =
            GridSnapshot::empty("case-1", RelationMode::WeaponsSuspects, GridDimensions::new(2, 2));
        snapshot.set(0, 0, CellState::Yes);
        let text =
            serde_json::to_string(&ServerEvent::GridUpdate(snapshot.clone())).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["type"], "grid:update");
        assert_eq!(value["caseId"], "case-1");
        assert_eq!(value["mode"], "weapons");
        assert_eq!(value["cells"]["0:0"], "yes");

        let decoded: ServerEvent = serde_json::from_str(&text).expect("decode");
        assert_eq!(decoded, ServerEvent::GridUpdate(snapshot));
    }

    #[test_timeout::timeout]
    fn unknown_event_types_fail_to_decode() {
        let text = r#"{"type":"case:deleted","caseId":"case-1"}"#;
        assert!(serde_json::from_str::<ServerEvent>(text).is_err());
    }

    #[test_timeout::timeout]
    fn missing_cells_default_to_empty() {
        let payload: GridPayload = serde_json::from_str(r#"{"rows":0,"cols":0}"#).expect("decode");
        assert!(payload.is_absent());
    }
}
