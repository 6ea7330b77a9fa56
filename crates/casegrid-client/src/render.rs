use casegrid_core::{CellState, GridSnapshot, RelationMode};
use parking_lot::Mutex;

use crate::session::CellChange;

/// Receives every cell whose displayed value must change.
pub trait GridRenderer: Send + Sync {
    fn paint(&self, mode: RelationMode, row: usize, col: usize, state: CellState);
}

impl<F> GridRenderer for F
where
    F: Fn(RelationMode, usize, usize, CellState) + Send + Sync,
{
    fn paint(&self, mode: RelationMode, row: usize, col: usize, state: CellState) {
        (self)(mode, row, col, state)
    }
}

/// Renderer for headless viewers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl GridRenderer for NullRenderer {
    fn paint(&self, _mode: RelationMode, _row: usize, _col: usize, _state: CellState) {}
}

/// Keeps every paint call in order.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    painted: Mutex<Vec<CellChange>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn painted(&self) -> Vec<CellChange> {
        self.painted.lock().clone()
    }

    pub fn take(&self) -> Vec<CellChange> {
        std::mem::take(&mut *self.painted.lock())
    }
}

impl GridRenderer for RecordingRenderer {
    fn paint(&self, mode: RelationMode, row: usize, col: usize, state: CellState) {
        self.painted.lock().push(CellChange {
            mode,
            row,
            col,
            state,
        });
    }
}

/// Plain-text grid, one line per row, using the cell glyphs.
pub fn render_text(snapshot: &GridSnapshot) -> String {
    let mut out = String::with_capacity(snapshot.rows * (snapshot.cols * 2 + 1));
    for row in 0..snapshot.rows {
        for col in 0..snapshot.cols {
            if col > 0 {
                out.push(' ');
            }
            out.push(snapshot.get(row, col).glyph());
        }
        out.push('\n');
    }
    out
}
