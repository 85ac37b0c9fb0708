//! Helix Key Server
//!
//! Account directory reachable over the Helix encrypted channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use helix_core::tracing_init::init_tracing;
use helix_crypto::IdentityKeyPair;
use helix_keyserver::{KeyServer, KeyServerOptions};

#[derive(Parser, Debug)]
#[command(name = "helix-keyserver")]
#[command(version, about = "Helix key server - account directory and key lookup")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:5567")]
    addr: SocketAddr,

    /// Server identity key file; generated on first start.
    #[arg(long, env = "HELIX_KEYSERVER_IDENTITY")]
    identity_key: Option<PathBuf>,

    /// Identifier announced in the handshake.
    #[arg(long, default_value = "helix-keyserver")]
    server_id: String,

    /// Delay added to every search, in milliseconds.
    #[arg(long, default_value_t = 0)]
    search_delay_ms: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("helix_keyserver=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting helix-keyserver"
    );

    let key_path = match args.identity_key {
        Some(path) => path,
        None => default_identity_path()?,
    };
    let identity = Arc::new(IdentityKeyPair::load_or_generate(&key_path)?);
    info!(
        path = %key_path.display(),
        fingerprint = %identity.fingerprint(),
        "Server identity loaded"
    );

    let options = KeyServerOptions {
        server_id: args.server_id,
        search_delay: Duration::from_millis(args.search_delay_ms),
    };
    let server = KeyServer::bind(args.addr, identity, options).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    shutdown_tx.send_replace(true);
    serve.await?;

    info!("Key server stopped");
    Ok(())
}

fn default_identity_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?;
    Ok(base.join("helix-keyserver").join("identity.key"))
}
