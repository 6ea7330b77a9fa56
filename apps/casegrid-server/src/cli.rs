use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use casegrid_client::{render_text, ApiClient, ClientConfig, GridRenderer, Viewer};
use casegrid_core::{CellState, RelationMode};
use clap::{Parser, Subcommand};
use tokio::time::{timeout, Duration};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "casegrid-server")]
#[command(about = "Case grid server and live grid viewer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API and broadcast server (default)
    Serve,
    /// Open a case and print every repaint pushed by other viewers
    Watch {
        /// Server base URL (e.g., http://localhost:3030)
        #[arg(short, long, default_value = "http://localhost:3030")]
        url: String,

        /// Case ID to open
        #[arg(short, long)]
        case: String,
    },
}

/// Prints repaints once the initial grids have been shown.
#[derive(Default)]
struct PrintRenderer {
    live: AtomicBool,
}

impl GridRenderer for PrintRenderer {
    fn paint(&self, mode: RelationMode, row: usize, col: usize, state: CellState) {
        if self.live.load(Ordering::Relaxed) {
            println!("{mode} [{row}:{col}] {}", state.glyph());
        }
    }
}

pub async fn run_watch(url: String, case_id: String) -> Result<()> {
    let config = ClientConfig {
        base_url: url,
        ..ClientConfig::from_env()
    };
    let api = ApiClient::new(config.api_base());
    let case = api
        .case(&case_id)
        .await
        .with_context(|| format!("failed to fetch case {case_id}"))?;

    let renderer = Arc::new(PrintRenderer::default());
    let viewer = Viewer::connect(&config, renderer.clone());
    viewer.open(&case).await;
    println!("{} ({})", case.title, case.id);
    for mode in RelationMode::ALL {
        if let Some(snapshot) = viewer.snapshot(mode) {
            println!("-- {mode} {}", snapshot.dimensions());
            print!("{}", render_text(&snapshot));
        }
    }

    renderer.live.store(true, Ordering::Relaxed);
    timeout(Duration::from_secs(5), viewer.wait_connected())
        .await
        .context("timed out connecting to the grid broadcast")??;
    info!(case_id = %case.id, url = %config.websocket_url(), "watching grid updates");

    tokio::signal::ctrl_c().await?;
    Ok(())
}
