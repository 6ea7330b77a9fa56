use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GridError;

/// Tri-state deduction mark for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    #[default]
    Unknown,
    Yes,
    No,
}

impl CellState {
    /// Next value of the click cycle `Unknown -> Yes -> No -> Unknown`.
    pub fn cycled(self) -> Self {
        match self {
            CellState::Unknown => CellState::Yes,
            CellState::Yes => CellState::No,
            CellState::No => CellState::Unknown,
        }
    }

    pub fn glyph(self) -> char {
        match self {
            CellState::Unknown => '?',
            CellState::Yes => '✔',
            CellState::No => '✕',
        }
    }
}

/// Which pair of entity lists a grid relates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationMode {
    /// Suspects (rows) against weapons (columns).
    #[serde(rename = "weapons")]
    WeaponsSuspects,
    /// Suspects (rows) against locations (columns).
    #[serde(rename = "locations")]
    LocationsSuspects,
    /// Locations (rows) against weapons (columns).
    #[serde(rename = "loc-weapons")]
    WeaponsLocations,
}

impl RelationMode {
    pub const ALL: [RelationMode; 3] = [
        RelationMode::WeaponsSuspects,
        RelationMode::LocationsSuspects,
        RelationMode::WeaponsLocations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationMode::WeaponsSuspects => "weapons",
            RelationMode::LocationsSuspects => "locations",
            RelationMode::WeaponsLocations => "loc-weapons",
        }
    }

    /// Grid shape for this mode given the current entity-list lengths.
    pub fn dimensions(self, suspects: usize, locations: usize, weapons: usize) -> GridDimensions {
        match self {
            RelationMode::WeaponsSuspects => GridDimensions::new(suspects, weapons),
            RelationMode::LocationsSuspects => GridDimensions::new(suspects, locations),
            RelationMode::WeaponsLocations => GridDimensions::new(locations, weapons),
        }
    }
}

impl fmt::Display for RelationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationMode {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s.trim())
            .ok_or_else(|| GridError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridDimensions {
    pub rows: usize,
    pub cols: usize,
}

impl GridDimensions {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }
}

impl fmt::Display for GridDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Zero-indexed cell address, encoded on the wire as `"<row>:<col>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: usize,
    pub col: usize,
}

impl CellKey {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

impl FromStr for CellKey {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GridError::InvalidCellKey(s.to_string());
        let (row, col) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            row: row.parse().map_err(|_| invalid())?,
            col: col.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Sparse cell map; an absent key means `Unknown`.
pub type Cells = BTreeMap<CellKey, CellState>;

/// The unit of storage and transmission: one relation's complete cell state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSnapshot {
    pub case_id: String,
    pub mode: RelationMode,
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub cells: Cells,
}

impl GridSnapshot {
    pub fn empty(case_id: impl Into<String>, mode: RelationMode, dims: GridDimensions) -> Self {
        Self {
            case_id: case_id.into(),
            mode,
            rows: dims.rows,
            cols: dims.cols,
            cells: Cells::new(),
        }
    }

    pub fn dimensions(&self) -> GridDimensions {
        GridDimensions::new(self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> CellState {
        self.cells
            .get(&CellKey::new(row, col))
            .copied()
            .unwrap_or_default()
    }

    /// Writes `state` into the cell. Returns `false` when the cell is out of range or
    /// already holds that value.
    pub fn set(&mut self, row: usize, col: usize, state: CellState) -> bool {
        if !self.dimensions().contains(row, col) || self.get(row, col) == state {
            return false;
        }
        let key = CellKey::new(row, col);
        match state {
            CellState::Unknown => {
                self.cells.remove(&key);
            }
            marked => {
                self.cells.insert(key, marked);
            }
        }
        true
    }

    /// Drops stale entries outside the grid and explicit `Unknown` entries.
    /// Returns how many entries were removed.
    pub fn prune(&mut self) -> usize {
        let dims = self.dimensions();
        let before = self.cells.len();
        self.cells
            .retain(|key, state| dims.contains(key.row, key.col) && *state != CellState::Unknown);
        before - self.cells.len()
    }

    /// Accepts the snapshot only if it was taken at `expected` dimensions, pruning any
    /// stale cells on the way.
    pub fn conform(mut self, expected: GridDimensions) -> Result<Self, GridError> {
        let found = self.dimensions();
        if found != expected {
            return Err(GridError::DimensionMismatch { expected, found });
        }
        self.prune();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn fresh_snapshot_is_sparse_and_unknown() {
        let snapshot = GridSnapshot::empty(
            "case-1",
            RelationMode::WeaponsLocations,
            GridDimensions::new(3, 4),
        );
        assert!(snapshot.cells.is_empty());
        for row in 0..3 {
            for col in 0..4 {
                assert_eq!(snapshot.get(row, col), CellState::Unknown);
            }
        }
    }

    #[test_timeout::timeout]
    fn cycle_returns_to_start_after_three_steps() {
        for start in [CellState::Unknown, CellState::Yes, CellState::No] {
            assert_eq!(start.cycled().cycled().cycled(), start);
        }
        assert_eq!(CellState::Unknown.cycled(), CellState::Yes);
        assert_eq!(CellState::Yes.cycled(), CellState::No);
    }

    #[test_timeout::timeout]
    fn set_ignores_out_of_range_and_unchanged_cells() {
        let mut snapshot =
            GridSnapshot::empty("case-1", RelationMode::WeaponsSuspects, GridDimensions::new(2, 2));
        assert!(!snapshot.set(2, 0, CellState::Yes));
        assert!(!snapshot.set(0, 0, CellState::Unknown));
        assert!(snapshot.set(0, 0, CellState::Yes));
        assert!(!snapshot.set(0, 0, CellState::Yes));
        assert!(snapshot.set(0, 0, CellState::Unknown));
        assert!(snapshot.cells.is_empty());
    }

    #[test_timeout::timeout]
    fn conform_rejects_drifted_dimensions() {
        let snapshot =
            GridSnapshot::empty("case-1", RelationMode::WeaponsSuspects, GridDimensions::new(2, 3));
        let err = snapshot
            .conform(GridDimensions::new(2, 2))
            .expect_err("dimension drift should be rejected");
        assert_eq!(
            err,
            GridError::DimensionMismatch {
                expected: GridDimensions::new(2, 2),
                found: GridDimensions::new(2, 3),
            }
        );
    }

    #[test_timeout::timeout]
    fn conform_prunes_stale_cells() {
        let mut snapshot = GridSnapshot::empty(
            "case-1",
            RelationMode::LocationsSuspects,
            GridDimensions::new(2, 2),
        );
        snapshot.cells.insert(CellKey::new(1, 1), CellState::No);
        snapshot.cells.insert(CellKey::new(5, 0), CellState::Yes);
        snapshot.cells.insert(CellKey::new(0, 1), CellState::Unknown);
        let conformed = snapshot.conform(GridDimensions::new(2, 2)).expect("same dimensions");
        assert_eq!(conformed.cells.len(), 1);
        assert_eq!(conformed.get(1, 1), CellState::No);
    }

    #[test_timeout::timeout]
    fn cells_use_row_col_string_keys_on_the_wire() {
        let mut snapshot = GridSnapshot::empty(
            "case-9",
            RelationMode::WeaponsLocations,
            GridDimensions::new(2, 3),
        );
        snapshot.set(1, 2, CellState::Yes);
        snapshot.set(0, 0, CellState::No);
        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "caseId": "case-9",
                "mode": "loc-weapons",
                "rows": 2,
                "cols": 3,
                "cells": { "0:0": "no", "1:2": "yes" }
            })
        );
        let decoded: GridSnapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, snapshot);
    }

    #[test_timeout::timeout]
    fn malformed_cell_keys_are_rejected() {
        assert!("3".parse::<CellKey>().is_err());
        assert!("a:1".parse::<CellKey>().is_err());
        assert!("-1:0".parse::<CellKey>().is_err());
        assert_eq!("4:7".parse::<CellKey>().ok(), Some(CellKey::new(4, 7)));
    }

    #[test_timeout::timeout]
    fn modes_map_entity_lists_to_axes() {
        assert_eq!(RelationMode::WeaponsSuspects.dimensions(4, 3, 2), GridDimensions::new(4, 2));
        assert_eq!(RelationMode::LocationsSuspects.dimensions(4, 3, 2), GridDimensions::new(4, 3));
        assert_eq!(RelationMode::WeaponsLocations.dimensions(4, 3, 2), GridDimensions::new(3, 2));
        assert_eq!(
            "loc-weapons".parse::<RelationMode>().ok(),
            Some(RelationMode::WeaponsLocations)
        );
        assert!("suspects".parse::<RelationMode>().is_err());
    }
}
