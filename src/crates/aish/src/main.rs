//! aish binary entry point

use aish::cli::{dispatch, AishArgs};
use aish::registry::{CiRegistry, ServiceEndpointResolver};
use aish::shell::MessageShell;
use aish::terminal::TerminalRegistry;
use clap::Parser;
use memory::sunset::SunsetConfig;
use memory::tokens::TokenCoster;
use memory::MemoryManager;
use std::sync::Arc;
use std::time::Duration;
use tooling::config::TektonConfig;
use tooling::persistence::{FileStore, KvStore};
use transport::client::{ClientConfig, HttpClient};
use transport::pool::{ConnectionPool, PoolConfig};

#[tokio::main]
async fn main() {
    let args = AishArgs::parse();
    let exit = run(args).await;
    std::process::exit(exit);
}

async fn run(args: AishArgs) -> i32 {
    let config = match TektonConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("aish: {}", e);
            return 2;
        }
    };

    let directive = if args.verbose { "debug" } else { "warn" };
    if let Err(e) = tooling::logging::init("aish", directive, config.log_dir.as_deref()) {
        eprintln!("aish: {}", e);
        return 2;
    }

    match build_and_dispatch(args, &config).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            0
        }
        Err(e) => {
            // One-line diagnostic plus the documentation path for the
            // failure category.
            eprintln!("aish: {}", e);
            eprintln!("see: {}", aish::help::error_help(&config.root, e.code()).display());
            e.exit_code()
        }
    }
}

async fn build_and_dispatch(args: AishArgs, config: &TektonConfig) -> aish::Result<String> {
    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(config.state_dir())?);
    let cis = CiRegistry::load(store.as_ref()).await?.unwrap_or_default();

    let http = HttpClient::new(ClientConfig::default())?;
    let pool = Arc::new(ConnectionPool::new(
        http.clone(),
        PoolConfig::default()
            .with_max_per_target(config.shell.pool_max_per_target)
            .with_queue_depth(config.shell.pool_queue_depth),
    ));

    let registry_url = format!("http://127.0.0.1:{}", config.registry_port);
    let resolver = Arc::new(ServiceEndpointResolver::new(
        registry::client::RegistryClient::new(registry_url, http),
    ));

    let terminals = Arc::new(TerminalRegistry::new());
    let memory = Arc::new(
        MemoryManager::new(
            config.memory,
            TokenCoster::fallback(),
            SunsetConfig::default(),
        )
        .with_store(store.clone()),
    );

    let shell = MessageShell::new(cis, terminals, pool, resolver, "operator")
        .with_store(store)
        .with_memory(memory)
        .with_team_chat_timeout(Duration::from_millis(config.shell.team_chat_timeout_ms));

    dispatch(&shell, &config.root, args.command).await
}
