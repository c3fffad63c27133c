//! Fleet simulator CLI.
//!
//! Loads the roster, optionally connects every charger, and keeps the
//! fleet running until interrupted. This front-end is the only place that
//! opts into exiting on session close.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vcp_fleet::{ws_url_from_env, FleetManager};

#[derive(Parser, Debug)]
#[command(name = "vcp-fleet", about = "Virtual charge point fleet simulator")]
struct Args {
    /// CSMS WebSocket endpoint (falls back to $WS_URL).
    #[arg(long)]
    ws_url: Option<String>,

    /// Roster file with the managed chargers.
    #[arg(long, default_value = "chargers.json")]
    roster: PathBuf,

    /// Connect every charger in the roster at startup.
    #[arg(long)]
    connect_all: bool,

    /// Terminate the process when a session closes.
    #[arg(long)]
    exit_on_close: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let ws_url = args.ws_url.unwrap_or_else(ws_url_from_env);
    info!(%ws_url, roster = %args.roster.display(), "starting fleet");

    let fleet = FleetManager::with_roster(ws_url, args.roster).await;
    fleet.set_exit_on_close(args.exit_on_close);
    let chargers = fleet.list().await;
    info!(count = chargers.len(), "roster loaded");

    if args.connect_all {
        let outcome = fleet.connect_all().await;
        info!(
            success = outcome.success,
            failed = outcome.failed,
            "connect sweep finished"
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for charger in fleet.list().await {
        if charger.connected {
            let _ = fleet.disconnect(&charger.cp_id).await;
        }
    }
    Ok(())
}
