//! Logging initialization and helpers
//!
//! Binaries call `init` exactly once before doing any work. Library crates
//! only emit through `tracing` macros and never install subscribers.

use std::path::Path;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for a binary
///
/// Honors `RUST_LOG` when set; falls back to the given default directive.
/// When a log directory is provided, output goes to a per-binary file under
/// it instead of stderr.
pub fn init(binary: &str, default_directive: &str, log_dir: Option<&Path>) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{}.log", binary)))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Await a future and log its wall-clock duration at debug level
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = future.await;
    debug!(operation = name, elapsed_ms = start.elapsed().as_millis() as u64, "Operation finished");
    result
}
