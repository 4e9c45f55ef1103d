use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns the compacted event count when it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match engine.compact_wal().await {
        Ok(kept) => {
            info!("compacted WAL: {appends} appends folded into {kept} events");
            Some(kept)
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            None
        }
    }
}

/// Background task that retries queued ledger repairs.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if engine.pending_repairs().is_empty() {
            continue;
        }
        let report = engine.reconcile_pending().await;
        if report.failed > 0 {
            tracing::warn!(
                "reconciler: {} repaired, {} still pending",
                report.repaired,
                report.failed
            );
        }
    }
}
