use casegrid_server::cli::{self, Cli, Commands};
use casegrid_server::config::Config;
use casegrid_server::telemetry::init_tracing;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();
    init_tracing(&cfg.log_filter);

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Watch { url, case }) => cli::run_watch(url, case).await,
        Some(Commands::Serve) | None => casegrid_server::run_server(cfg).await,
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}
