use std::sync::Arc;
use std::time::Duration;

use casegrid_core::{GridError, GridSnapshot, ServerEvent};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::render::GridRenderer;
use crate::session::GridSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Applies broadcast events to the session and repaints the cells they change.
///
/// Remote snapshots go straight into the session; they are never marked dirty.
#[derive(Clone)]
pub struct GridReconciler {
    session: Arc<Mutex<GridSession>>,
    renderer: Arc<dyn GridRenderer>,
}

impl GridReconciler {
    pub fn new(session: Arc<Mutex<GridSession>>, renderer: Arc<dyn GridRenderer>) -> Self {
        Self { session, renderer }
    }

    /// Decodes one text frame. Returns the number of repainted cells; anything
    /// undecodable repaints nothing.
    pub fn handle_text(&self, text: &str) -> usize {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::GridUpdate(snapshot)) => self.apply(snapshot),
            Err(err) => {
                debug!(target: "casegrid::sync", error = %err, "ignoring undecodable message");
                0
            }
        }
    }

    pub fn apply(&self, snapshot: GridSnapshot) -> usize {
        let case_id = snapshot.case_id.clone();
        let mode = snapshot.mode;
        let changes = self.session.lock().apply_remote(snapshot);
        let Some(changes) = changes else {
            trace!(target: "casegrid::sync", case_id = %case_id, %mode, "update for another case");
            return 0;
        };
        for change in &changes {
            self.renderer
                .paint(change.mode, change.row, change.col, change.state);
        }
        debug!(
            target: "casegrid::sync",
            case_id = %case_id,
            %mode,
            repainted = changes.len(),
            "applied remote grid"
        );
        changes.len()
    }
}

/// Background connection to the broadcast socket. Reconnects forever after a fixed
/// delay; nothing is resynchronised on reconnect.
pub struct SyncClient {
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl SyncClient {
    pub fn spawn(
        url: impl Into<String>,
        reconnect_delay: Duration,
        reconciler: GridReconciler,
    ) -> Self {
        let url = url.into();
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let task = tokio::spawn(run(url, reconnect_delay, reconciler, tx));
        Self { state: rx, task }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn wait_connected(&self) -> Result<(), GridError> {
        let mut state = self.state.clone();
        state
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| GridError::ConnectionLost("sync task stopped".into()))
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    url: String,
    reconnect_delay: Duration,
    reconciler: GridReconciler,
    state: watch::Sender<ConnectionState>,
) {
    loop {
        state.send_replace(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((mut stream, _)) => {
                info!(target: "casegrid::sync", %url, "connected to grid broadcast");
                state.send_replace(ConnectionState::Connected);
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            reconciler.handle_text(text.as_str());
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(target: "casegrid::sync", error = %err, "broadcast socket error");
                            break;
                        }
                    }
                }
                warn!(
                    target: "casegrid::sync",
                    %url,
                    retry_ms = reconnect_delay.as_millis() as u64,
                    "grid broadcast connection lost"
                );
            }
            Err(err) => {
                warn!(
                    target: "casegrid::sync",
                    %url,
                    error = %err,
                    retry_ms = reconnect_delay.as_millis() as u64,
                    "failed to connect to grid broadcast"
                );
            }
        }
        state.send_replace(ConnectionState::Disconnected);
        tokio::time::sleep(reconnect_delay).await;
    }
}
