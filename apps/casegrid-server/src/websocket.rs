use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::AppState;

pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

/// Pushes hub events to one viewer until either side goes away. Anything the viewer
/// sends is ignored.
async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let hub = state.publisher.hub().clone();
    let (viewer_id, mut rx) = hub.connect();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        target: "casegrid::hub",
                        %remote_addr,
                        error = %err,
                        "viewer socket error"
                    );
                    break;
                }
            }
        }
    });

    debug!(target: "casegrid::hub", viewer = %viewer_id, %remote_addr, "viewer socket open");
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    hub.disconnect(viewer_id);
    debug!(target: "casegrid::hub", viewer = %viewer_id, %remote_addr, "viewer socket closed");
}
