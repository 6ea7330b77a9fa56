use std::sync::Arc;
use std::time::Duration;

use casegrid_core::{Case, CellState, GridError, GridSnapshot, GridStore, RelationMode};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::coalescer::{FlushReport, SaveCoalescer};
use crate::config::ClientConfig;
use crate::http::ApiClient;
use crate::render::GridRenderer;
use crate::session::{GridSession, Tool};
use crate::sync::{ConnectionState, GridReconciler, SyncClient};

/// One viewer of a shared grid: a session, its save coalescer and, when connected,
/// the broadcast sync client.
///
/// Every local edit that changes a cell is painted immediately and marked dirty;
/// persistence and propagation happen behind the coalescer's window.
pub struct Viewer {
    session: Arc<Mutex<GridSession>>,
    store: Arc<dyn GridStore>,
    coalescer: SaveCoalescer,
    renderer: Arc<dyn GridRenderer>,
    sync: Option<SyncClient>,
}

impl Viewer {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        store: Arc<dyn GridStore>,
        renderer: Arc<dyn GridRenderer>,
        save_delay: Duration,
    ) -> Self {
        let session = Arc::new(Mutex::new(GridSession::new()));
        let coalescer = SaveCoalescer::new(store.clone(), session.clone(), save_delay);
        Self {
            session,
            store,
            coalescer,
            renderer,
            sync: None,
        }
    }

    /// Viewer backed by the HTTP API and subscribed to the server's broadcast socket.
    pub fn connect(config: &ClientConfig, renderer: Arc<dyn GridRenderer>) -> Self {
        let api = Arc::new(ApiClient::new(config.api_base()));
        let mut viewer = Self::new(api, renderer, config.save_delay);
        viewer.attach_sync(config.websocket_url(), config.reconnect_delay);
        viewer
    }

    pub fn attach_sync(&mut self, url: impl Into<String>, reconnect_delay: Duration) {
        let reconciler = GridReconciler::new(self.session.clone(), self.renderer.clone());
        self.sync = Some(SyncClient::spawn(url, reconnect_delay, reconciler));
    }

    /// Opens `case`, loading all three grids. Edits are refused from here until the
    /// grids arrive, and dirty grids of the previously open case are flushed first.
    /// Returns `false` when a later `open` superseded this one.
    pub async fn open(&self, case: &Case) -> bool {
        let ticket = self.session.lock().begin_open(case);
        if self.coalescer.has_dirty() {
            let report = self.coalescer.flush_now().await;
            let unsaved = self.coalescer.discard();
            if !unsaved.is_empty() {
                warn!(
                    target: "casegrid::session",
                    failed = report.failed.len(),
                    ?unsaved,
                    "switching cases with unsaved grid edits"
                );
            }
        }

        let loads = RelationMode::ALL.into_iter().map(|mode| {
            let store = self.store.clone();
            let case_id = case.id.clone();
            async move { (mode, store.load(&case_id, mode).await) }
        });
        let loaded = join_all(loads).await;

        let snapshots = {
            let mut session = self.session.lock();
            if !session.finish_open(ticket, loaded) {
                return false;
            }
            RelationMode::ALL
                .into_iter()
                .filter_map(|mode| session.snapshot(mode).cloned())
                .collect::<Vec<_>>()
        };
        for snapshot in &snapshots {
            self.repaint(snapshot);
        }
        info!(target: "casegrid::session", case_id = %case.id, "opened case grids");
        true
    }

    pub fn close(&self) {
        self.session.lock().close();
    }

    pub fn case_id(&self) -> Option<String> {
        self.session.lock().case_id().map(str::to_string)
    }

    pub fn is_loading(&self) -> bool {
        self.session.lock().is_loading()
    }

    /// Bare click: cycles the cell.
    pub fn cycle(&self, mode: RelationMode, row: usize, col: usize) -> Option<CellState> {
        self.apply_tool(mode, row, col, Tool::Cycle)
    }

    pub fn apply_tool(
        &self,
        mode: RelationMode,
        row: usize,
        col: usize,
        tool: Tool,
    ) -> Option<CellState> {
        self.edit(mode, row, col, |session| session.apply_tool(mode, row, col, tool))
    }

    pub fn pointer_down(
        &self,
        mode: RelationMode,
        row: usize,
        col: usize,
        tool: Tool,
    ) -> Option<CellState> {
        self.edit(mode, row, col, |session| session.pointer_down(mode, row, col, tool))
    }

    pub fn pointer_enter(&self, mode: RelationMode, row: usize, col: usize) -> Option<CellState> {
        self.edit(mode, row, col, |session| session.pointer_enter(mode, row, col))
    }

    pub fn pointer_up(&self) -> bool {
        self.session.lock().end_gesture()
    }

    pub fn pointer_cancel(&self) -> bool {
        self.session.lock().end_gesture()
    }

    pub fn pointer_leave(&self) -> bool {
        self.session.lock().end_gesture()
    }

    pub fn is_painting(&self) -> bool {
        self.session.lock().is_painting()
    }

    pub fn cell(&self, mode: RelationMode, row: usize, col: usize) -> Option<CellState> {
        self.session.lock().cell(mode, row, col)
    }

    pub fn snapshot(&self, mode: RelationMode) -> Option<GridSnapshot> {
        self.session.lock().snapshot(mode).cloned()
    }

    pub async fn flush_now(&self) -> FlushReport {
        self.coalescer.flush_now().await
    }

    pub fn flush_reports(&self) -> broadcast::Receiver<FlushReport> {
        self.coalescer.subscribe()
    }

    pub fn coalescer(&self) -> &SaveCoalescer {
        &self.coalescer
    }

    pub fn session(&self) -> Arc<Mutex<GridSession>> {
        self.session.clone()
    }

    pub fn sync_state(&self) -> Option<ConnectionState> {
        self.sync.as_ref().map(SyncClient::state)
    }

    pub async fn wait_connected(&self) -> Result<(), GridError> {
        match &self.sync {
            Some(sync) => sync.wait_connected().await,
            None => Err(GridError::ConnectionLost("viewer has no sync client".into())),
        }
    }

    /// Runs one session mutation and, when a cell changed, paints it and marks its
    /// grid dirty under the case it was applied to.
    fn edit(
        &self,
        mode: RelationMode,
        row: usize,
        col: usize,
        mutate: impl FnOnce(&mut GridSession) -> Option<CellState>,
    ) -> Option<CellState> {
        let (case_id, state) = {
            let mut session = self.session.lock();
            let state = mutate(&mut session)?;
            (session.case_id()?.to_string(), state)
        };
        self.coalescer.mark_dirty(&case_id, mode);
        self.renderer.paint(mode, row, col, state);
        Some(state)
    }

    fn repaint(&self, snapshot: &GridSnapshot) {
        for row in 0..snapshot.rows {
            for col in 0..snapshot.cols {
                self.renderer.paint(snapshot.mode, row, col, snapshot.get(row, col));
            }
        }
    }
}
