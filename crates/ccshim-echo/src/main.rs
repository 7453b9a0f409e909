//! ccshim-echo: echo chaincode driven by the ccshim session layer.
//!
//! ```bash
//! # the peer launches us and tells us where to dial
//! CORE_CHAINCODE_ID_NAME=echo:1.0 ccshim-echo --peer.address peer0:7052
//!
//! # chaincode-as-a-service: wait for the peer to connect
//! CORE_CHAINCODE_ID_NAME=echo:1.0 ccshim-echo --address 0.0.0.0:9999
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use ccshim_core::config::process_env;
use ccshim_core::ShimConfig;

mod echo;

use echo::EchoHandler;

#[derive(Parser, Debug)]
#[command(name = "ccshim-echo")]
#[command(about = "Echo chaincode over the ccshim session layer")]
#[command(version)]
struct Args {
    /// Peer to dial. Without it the chaincode listens for the peer.
    #[arg(long = "peer.address")]
    peer_address: Option<String>,

    /// Local listen address (listen mode only)
    #[arg(long)]
    address: Option<String>,

    /// Config file, instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => {
            let mut config = ShimConfig::from_file(path)?;
            config.apply_env_overrides(&process_env);
            config
        }
        None => ShimConfig::load()?,
    };
    if let Some(addr) = args.peer_address {
        config.peer.address = addr;
    }
    if let Some(addr) = args.address {
        config.server.listen_address = addr;
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let mut chaincode =
        tokio::spawn(async move { ccshim::start(&config, EchoHandler::new, None, shutdown_rx).await });

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        joined = &mut chaincode => match joined? {
            Ok(()) => Ok(()),
            Err(e) if e.is_stream_ended() => {
                tracing::info!("peer closed the stream");
                Ok(())
            }
            Err(e) => Err(e).context("chaincode exited"),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(());
            Ok(())
        }
    }
}
