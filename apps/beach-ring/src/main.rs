use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use beach_ring::{
    cli::{self, Cli, Commands},
    config::{Config, ServeArgs},
    handlers::AppState,
    server,
    telemetry::Telemetry,
    Relay,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Watch(args)) => {
            Telemetry::init(false)?;
            if let Err(e) = cli::run_watch_client(args).await {
                error!("Watch client error: {}", e);
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(cli.serve).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let telemetry = Telemetry::init(true)?;
    let config = Config::try_from(args)?;
    info!(
        listen_addr = %config.listen_addr,
        cors_origin = ?config.cors_origin,
        "starting beach-ring relay"
    );

    let state = AppState::new(
        Relay::with_outbox_capacity(config.outbox_capacity),
        telemetry.metrics_handle(),
    );
    server::run(config, state).await
}
