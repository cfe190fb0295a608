use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::calendar::now_ms;
use crate::engine::Engine;

/// Background task that expires bookings whose slot has ended, including any
/// left over from previous days. The first sweep runs immediately so a restart
/// starts clean.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.expire_finished_bookings(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("expired {n} finished bookings"),
            Err(e) => tracing::warn!("reaper: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.tick().await;
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
