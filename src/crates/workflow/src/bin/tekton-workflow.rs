//! Workflow orchestrator server binary
//!
//! Hosts workflow definition and execution control endpoints plus the
//! standard `/workflow` push endpoint, dispatching task actions to
//! components resolved through the service registry.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tooling::config::TektonConfig;
use tooling::persistence::{FileStore, KvStore};
use tracing::info;
use transport::client::{ClientConfig, HttpClient};
use transport::pool::{ConnectionPool, PoolConfig};
use workflow::api::{router, ApiState};
use workflow::checkpoint::CheckpointStore;
use workflow::dispatch::{HttpDispatcher, RegistryResolver};
use workflow::engine::{EngineConfig, WorkflowEngine};
use workflow::service::OrchestratorService;

/// tekton workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "tekton-workflow")]
#[command(version, about = "tekton DAG workflow orchestrator", long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port (overrides TEKTON_WORKFLOW_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Component id used for /workflow dest matching
    #[arg(long, default_value = "tekton-workflow")]
    component_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = TektonConfig::from_env()?;
    tooling::logging::init("tekton-workflow", "info", config.log_dir.as_deref())?;

    let port = match args.port {
        Some(port) => port,
        None => config.component_port(&args.component_id)?.unwrap_or(8200),
    };
    let addr: SocketAddr = format!("{}:{}", args.host, port).parse()?;

    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(config.state_dir())?);
    let checkpoints = Arc::new(CheckpointStore::new(store));

    let http = HttpClient::new(ClientConfig::default())?;
    let pool = Arc::new(ConnectionPool::new(
        http.clone(),
        PoolConfig::default()
            .with_max_per_target(config.shell.pool_max_per_target)
            .with_queue_depth(config.shell.pool_queue_depth),
    ));
    let registry_url = format!("http://127.0.0.1:{}", config.registry_port);
    let resolver = Arc::new(RegistryResolver::new(registry::client::RegistryClient::new(
        registry_url,
        http,
    )));
    let dispatcher = Arc::new(HttpDispatcher::new(resolver, pool));

    let engine = Arc::new(
        WorkflowEngine::new(dispatcher)
            .with_config(
                EngineConfig::default()
                    .with_max_concurrent_tasks(config.workflow.max_concurrent_tasks)
                    .with_checkpoint_interval(Duration::from_secs(
                        config.workflow.checkpoint_interval_sec,
                    )),
            )
            .with_checkpoints(checkpoints.clone()),
    );
    let service = Arc::new(OrchestratorService::new(engine, checkpoints));

    let app = router(ApiState {
        service,
        component_id: args.component_id,
    });
    info!(%addr, "tekton-workflow listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
