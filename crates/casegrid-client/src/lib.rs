//! Viewer side of the shared grid: the optimistic session, the save coalescer,
//! the HTTP store and the broadcast sync client, tied together by [`Viewer`].

pub mod coalescer;
pub mod config;
pub mod http;
pub mod render;
pub mod session;
pub mod sync;
pub mod viewer;

pub use coalescer::{DirtyGrid, FlushReport, SaveCoalescer, SnapshotSource, DEFAULT_SAVE_DELAY};
pub use config::ClientConfig;
pub use http::{ApiClient, ClientError};
pub use render::{render_text, GridRenderer, NullRenderer, RecordingRenderer};
pub use session::{CellChange, GridSession, OpenTicket, Tool};
pub use sync::{ConnectionState, GridReconciler, SyncClient};
pub use viewer::Viewer;
