//! Service registry server binary
//!
//! Hosts the registration, heartbeat, resolution, and event-stream
//! endpoints, with the health sweep and periodic snapshotting running as
//! background tasks.

use clap::Parser;
use registry::api::{router, ApiState};
use registry::monitor::spawn_monitor;
use registry::registry::ServiceRegistry;
use registry::snapshot;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tooling::config::TektonConfig;
use tooling::persistence::{FileStore, KvStore};
use tracing::info;

/// tekton service registry
#[derive(Parser, Debug)]
#[command(name = "tekton-registry")]
#[command(version, about = "tekton service registry and routing fabric", long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port (overrides TEKTON_REGISTRY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Snapshot interval in seconds
    #[arg(long, default_value_t = 60)]
    snapshot_interval_sec: u64,

    /// Intake bound for state-changing requests
    #[arg(long, default_value_t = 256)]
    intake_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = TektonConfig::from_env()?;
    tooling::logging::init("tekton-registry", "info", config.log_dir.as_deref())?;

    let port = args.port.unwrap_or(config.registry_port);
    let addr: SocketAddr = format!("{}:{}", args.host, port).parse()?;

    let registry = Arc::new(ServiceRegistry::new(config.heartbeat));
    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(config.state_dir())?);

    if snapshot::load(&registry, store.as_ref()).await? {
        info!("Restored registry snapshot; components must re-register");
    }

    let _monitor = spawn_monitor(registry.clone());
    let _snapshotter = snapshot::spawn_snapshotter(
        registry.clone(),
        store.clone(),
        Duration::from_secs(args.snapshot_interval_sec),
    );

    let app = router(ApiState::new(registry, args.intake_limit));
    info!(%addr, "tekton-registry listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
