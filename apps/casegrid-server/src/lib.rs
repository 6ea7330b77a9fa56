//! Case grid server: case records, grid persistence and the grid broadcast socket.

pub mod cli;
pub mod config;
pub mod hub;
pub mod routes;
pub mod storage;
pub mod telemetry;
pub mod websocket;

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::hub::{BroadcastHub, GridPublisher};
use crate::storage::SharedStorage;

#[derive(Clone)]
pub struct AppState {
    pub storage: SharedStorage,
    pub publisher: GridPublisher,
}

impl AppState {
    pub fn new(storage: SharedStorage) -> Self {
        let publisher = GridPublisher::new(storage.clone(), BroadcastHub::new());
        Self { storage, publisher }
    }

    pub fn hub(&self) -> &BroadcastHub {
        self.publisher.hub()
    }
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let storage = storage::connect(&config).await?;
    let state = AppState::new(storage);
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        redis = %config.redis_url.as_deref().unwrap_or("unset"),
        "casegrid server listening"
    );
    serve(listener, state).await
}

/// Serves the API on an already bound listener until ctrl-c.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = routes::build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    } else {
        std::future::pending::<()>().await;
    }
}
