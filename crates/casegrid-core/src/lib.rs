//! Casegrid core: the types every participant in a shared deduction grid agrees on.
//!
//! Responsibilities:
//! - the grid model (cell states, relation modes, sparse snapshots)
//! - the case record the grid dimensions are derived from
//! - the JSON wire shapes pushed over HTTP and the broadcast socket
//! - the `GridStore` contract implemented by the server backends and the HTTP client

pub mod case;
pub mod error;
pub mod model;
pub mod protocol;
pub mod store;

pub use case::{Case, CaseDraft, CaseSummary};
pub use error::GridError;
pub use model::{CellKey, CellState, Cells, GridDimensions, GridSnapshot, RelationMode};
pub use protocol::{GridPayload, GridWrite, ServerEvent};
pub use store::GridStore;
