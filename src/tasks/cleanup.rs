//! Stat-Cache Cleanup Task
//!
//! Background task that periodically purges expired filesystem statuses.
//! Lookups already treat expired entries as absent; this only reclaims memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::stat::StatCache;

/// Spawns a background task purging expired entries every `cleanup_interval_secs`.
///
/// The returned handle is aborted on graceful shutdown.
pub fn spawn_cleanup_task(cache: Arc<StatCache>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting stat cache cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();
            if removed > 0 {
                info!(
                    "Stat cache cleanup: removed {} expired entries, hit rate {:.2}",
                    removed,
                    cache.stats().hit_rate()
                );
            } else {
                debug!("Stat cache cleanup: no expired entries found");
            }
        }
    })
}
