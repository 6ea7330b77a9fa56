use std::collections::BTreeMap;

use casegrid_core::{Case, CellState, GridDimensions, GridError, GridSnapshot, RelationMode};
use tracing::{debug, trace, warn};

/// How a pointer press picks the value it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Advance the pressed cell through `Unknown -> Yes -> No -> Unknown`.
    Cycle,
    Unknown,
    Yes,
    No,
    /// Same as `Unknown`; offered separately by the tool palette.
    Erase,
}

impl Tool {
    pub fn resolve(self, current: CellState) -> CellState {
        match self {
            Tool::Cycle => current.cycled(),
            Tool::Unknown | Tool::Erase => CellState::Unknown,
            Tool::Yes => CellState::Yes,
            Tool::No => CellState::No,
        }
    }
}

impl From<CellState> for Tool {
    fn from(state: CellState) -> Self {
        match state {
            CellState::Unknown => Tool::Unknown,
            CellState::Yes => Tool::Yes,
            CellState::No => Tool::No,
        }
    }
}

/// A cell whose rendered value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub mode: RelationMode,
    pub row: usize,
    pub col: usize,
    pub state: CellState,
}

/// Handed out by [`GridSession::begin_open`]; only the newest ticket may complete.
#[derive(Debug, Clone)]
pub struct OpenTicket {
    token: u64,
    case_id: String,
    dims: BTreeMap<RelationMode, GridDimensions>,
}

impl OpenTicket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Debug)]
struct OpenGrid {
    case_id: String,
    dims: BTreeMap<RelationMode, GridDimensions>,
    snapshots: BTreeMap<RelationMode, GridSnapshot>,
}

#[derive(Debug, Clone, Copy)]
struct PaintGesture {
    value: CellState,
}

/// Locally materialized grids for the case that is currently open.
///
/// Every mutation is applied synchronously; persistence and fan-out live elsewhere.
/// While an open is loading the held grids stay readable but refuse edits, since
/// they are about to be replaced.
#[derive(Debug, Default)]
pub struct GridSession {
    load_token: u64,
    loading: bool,
    open: Option<OpenGrid>,
    gesture: Option<PaintGesture>,
}

impl GridSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts opening `case`, superseding any open still in flight. Edits are refused
    /// until the newest open finishes or the session is closed.
    pub fn begin_open(&mut self, case: &Case) -> OpenTicket {
        self.load_token += 1;
        self.loading = true;
        self.gesture = None;
        let dims = RelationMode::ALL
            .into_iter()
            .map(|mode| (mode, case.dimensions(mode)))
            .collect();
        OpenTicket {
            token: self.load_token,
            case_id: case.id.clone(),
            dims,
        }
    }

    /// Installs the loaded snapshots. Returns `false` (and changes nothing) when a newer
    /// open has started since `ticket` was issued.
    pub fn finish_open(
        &mut self,
        ticket: OpenTicket,
        loaded: Vec<(RelationMode, Result<GridSnapshot, GridError>)>,
    ) -> bool {
        if ticket.token != self.load_token {
            debug!(
                target: "casegrid::session",
                case_id = %ticket.case_id,
                stale = ticket.token,
                current = self.load_token,
                "discarding superseded grid load"
            );
            return false;
        }

        let mut loaded: BTreeMap<RelationMode, Result<GridSnapshot, GridError>> =
            loaded.into_iter().collect();
        let mut snapshots = BTreeMap::new();
        for (mode, dims) in &ticket.dims {
            let snapshot = match loaded.remove(mode) {
                Some(Ok(snapshot)) => match snapshot.conform(*dims) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        debug!(
                            target: "casegrid::session",
                            case_id = %ticket.case_id,
                            %mode,
                            error = %err,
                            "discarding stored grid"
                        );
                        GridSnapshot::empty(ticket.case_id.clone(), *mode, *dims)
                    }
                },
                Some(Err(err)) if err.is_not_found() => {
                    GridSnapshot::empty(ticket.case_id.clone(), *mode, *dims)
                }
                Some(Err(err)) => {
                    warn!(
                        target: "casegrid::session",
                        case_id = %ticket.case_id,
                        %mode,
                        error = %err,
                        "grid load failed; starting from an empty grid"
                    );
                    GridSnapshot::empty(ticket.case_id.clone(), *mode, *dims)
                }
                None => GridSnapshot::empty(ticket.case_id.clone(), *mode, *dims),
            };
            // Loaded records carry the case id they were requested under.
            let snapshot = GridSnapshot {
                case_id: ticket.case_id.clone(),
                ..snapshot
            };
            snapshots.insert(*mode, snapshot);
        }

        self.loading = false;
        self.gesture = None;
        self.open = Some(OpenGrid {
            case_id: ticket.case_id,
            dims: ticket.dims,
            snapshots,
        });
        true
    }

    /// Opens `case` with nothing loaded from the store.
    pub fn open_empty(&mut self, case: &Case) {
        let ticket = self.begin_open(case);
        self.finish_open(ticket, Vec::new());
    }

    pub fn close(&mut self) {
        self.load_token += 1;
        self.loading = false;
        self.open = None;
        self.gesture = None;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn case_id(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.case_id.as_str())
    }

    /// Authoritative dimensions for `mode`, derived from the case's entity lists.
    pub fn dimensions(&self, mode: RelationMode) -> Option<GridDimensions> {
        self.open.as_ref()?.dims.get(&mode).copied()
    }

    pub fn snapshot(&self, mode: RelationMode) -> Option<&GridSnapshot> {
        self.open.as_ref()?.snapshots.get(&mode)
    }

    pub fn cell(&self, mode: RelationMode, row: usize, col: usize) -> Option<CellState> {
        let dims = self.dimensions(mode)?;
        if !dims.contains(row, col) {
            return None;
        }
        Some(self.snapshot(mode)?.get(row, col))
    }

    /// Applies `tool` to one cell. Returns the new value only when the cell changed.
    pub fn apply_tool(
        &mut self,
        mode: RelationMode,
        row: usize,
        col: usize,
        tool: Tool,
    ) -> Option<CellState> {
        if self.loading {
            return None;
        }
        let open = self.open.as_mut()?;
        if !open.dims.get(&mode)?.contains(row, col) {
            return None;
        }
        let snapshot = open.snapshots.get_mut(&mode)?;
        let next = tool.resolve(snapshot.get(row, col));
        if !snapshot.set(row, col, next) {
            return None;
        }
        trace!(target: "casegrid::session", %mode, row, col, state = ?next, "cell changed");
        Some(next)
    }

    /// Pointer pressed on a cell: fixes the gesture's value and applies it there.
    pub fn pointer_down(
        &mut self,
        mode: RelationMode,
        row: usize,
        col: usize,
        tool: Tool,
    ) -> Option<CellState> {
        if self.loading {
            return None;
        }
        let current = self.cell(mode, row, col)?;
        let value = tool.resolve(current);
        self.gesture = Some(PaintGesture { value });
        self.apply_tool(mode, row, col, value.into())
    }

    /// Pointer entered a cell: paints the gesture's fixed value if a gesture is active.
    pub fn pointer_enter(
        &mut self,
        mode: RelationMode,
        row: usize,
        col: usize,
    ) -> Option<CellState> {
        let value = self.gesture?.value;
        self.apply_tool(mode, row, col, value.into())
    }

    /// Ends the gesture (pointer up, cancel, or leaving the grid surface). Returns
    /// whether a gesture was active.
    pub fn end_gesture(&mut self) -> bool {
        self.gesture.take().is_some()
    }

    pub fn is_painting(&self) -> bool {
        self.gesture.is_some()
    }

    /// Replaces the matching grid wholesale with an authoritative snapshot.
    ///
    /// Returns `None` when no case is open or the snapshot belongs to another case,
    /// otherwise the visible cells whose value differs from what was shown before.
    pub fn apply_remote(&mut self, snapshot: GridSnapshot) -> Option<Vec<CellChange>> {
        let open = self.open.as_mut()?;
        if open.case_id != snapshot.case_id {
            return None;
        }
        let mode = snapshot.mode;
        let visible = *open.dims.get(&mode)?;
        let previous = open.snapshots.insert(mode, snapshot)?;
        let current = open.snapshots.get(&mode)?;

        let mut changes = Vec::new();
        for row in 0..visible.rows {
            for col in 0..visible.cols {
                let state = current.get(row, col);
                if previous.get(row, col) != state {
                    changes.push(CellChange {
                        mode,
                        row,
                        col,
                        state,
                    });
                }
            }
        }
        Some(changes)
    }
}
