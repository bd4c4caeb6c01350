//! VAR server binary: wires the arena client, recorder client, controller,
//! and operator gateway together and runs them until shutdown.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use var_arena::ArenaClient;
use var_controller::Controller;
use var_db::Db;
use var_hyperdeck::HyperdeckClient;
use var_web::Bus;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "var-server")]
#[command(about = "Video Assistant Referee coordinator")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "VAR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let db = match Db::open(&config.db) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    let arena = Arc::new(ArenaClient::new(config.arena, db.clone()));
    let hyperdeck = Arc::new(HyperdeckClient::new(config.hyperdeck));
    let bus = Arc::new(Bus::new(config.ui));
    let _controller = Controller::new(
        config.var,
        db,
        arena.clone(),
        hyperdeck.clone(),
        bus.clone(),
    );

    let arena_task = tokio::spawn({
        let arena = arena.clone();
        async move { arena.run().await }
    });
    let hyperdeck_task = tokio::spawn({
        let hyperdeck = hyperdeck.clone();
        async move { hyperdeck.run().await }
    });
    let gateway_task = tokio::spawn(var_web::run(bus.clone(), config.server));

    tokio::select! {
        result = arena_task => {
            // The arena loop only returns when authentication cannot succeed
            match result {
                Ok(Err(e)) => error!(error = %e, "arena client requested shutdown"),
                Ok(Ok(())) => error!("arena client task ended unexpectedly"),
                Err(e) => error!(error = %e, "arena client task panicked"),
            }
            ExitCode::FAILURE
        }
        result = hyperdeck_task => {
            match result {
                Err(e) => error!(error = %e, "recorder client task panicked"),
                Ok(()) => error!("recorder client task ended unexpectedly"),
            }
            ExitCode::FAILURE
        }
        result = gateway_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "operator gateway failed"),
                Ok(Ok(())) => error!("operator gateway ended unexpectedly"),
                Err(e) => error!(error = %e, "operator gateway task panicked"),
            }
            ExitCode::FAILURE
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            ExitCode::SUCCESS
        }
    }
}
