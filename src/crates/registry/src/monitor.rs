//! Background health sweep
//!
//! A single task walks the heartbeat ledger on a fraction of the heartbeat
//! interval, degrading components past T1 and failing components past T2.
//! The sweep only reads the monotonic clock; heartbeat intake is never
//! blocked by it.

use crate::registry::ServiceRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Spawn the health sweep task
///
/// Sweeps at half the heartbeat interval so a missed deadline is observed
/// within one interval of elapsing.
pub fn spawn_monitor(registry: Arc<ServiceRegistry>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_millis(registry.heartbeat_config().interval_ms.max(2) / 2);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!("Running health sweep");
            registry.sweep(Instant::now()).await;
        }
    })
}
