use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use ulid::Ulid;

use crate::clock::now_ms;
use crate::engine::{Countdown, Engine};
use crate::model::*;

pub const DEFAULT_THRESHOLDS: [u32; 3] = [5, 3, 1];

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// One threshold crossing for one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub booking_id: Ulid,
    pub threshold: u32,
    pub customer: String,
    pub resources: Vec<ResourceKey>,
    pub end: Ms,
    pub raised_at: Ms,
}

/// Whole minutes remaining, rounded up. Zero once past due.
pub fn minutes_left(end: Ms, now: Ms) -> i64 {
    let remaining = (end - now).max(0);
    (remaining + MINUTE_MS - 1) / MINUTE_MS
}

/// Countdown alerts. Each `(booking, threshold)` fires at most once while the
/// booking stays active, and stays pending until acknowledged.
pub struct AlertEngine {
    thresholds: Vec<u32>,
    fired: DashSet<(Ulid, u32)>,
    pending: DashMap<(Ulid, u32), Alert>,
    tx: broadcast::Sender<Alert>,
}

impl AlertEngine {
    pub fn new(thresholds: Vec<u32>) -> Self {
        Self {
            thresholds,
            fired: DashSet::new(),
            pending: DashMap::new(),
            tx: broadcast::channel(ALERT_CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// Raise whatever thresholds the active bookings sit on right now.
    pub fn scan(&self, now: Ms, active: &[Countdown]) -> Vec<Alert> {
        let live: HashSet<Ulid> = active
            .iter()
            .filter(|c| c.end > now)
            .map(|c| c.booking_id)
            .collect();
        self.fired.retain(|(id, _)| live.contains(id));

        let mut raised = Vec::new();
        for c in active.iter().filter(|c| live.contains(&c.booking_id)) {
            let left = minutes_left(c.end, now);
            let Some(&threshold) = self.thresholds.iter().find(|&&t| i64::from(t) == left) else {
                continue;
            };
            if !self.fired.insert((c.booking_id, threshold)) {
                continue;
            }
            let alert = Alert {
                booking_id: c.booking_id,
                threshold,
                customer: c.customer.clone(),
                resources: c.resources.clone(),
                end: c.end,
                raised_at: now,
            };
            info!(
                "{threshold} min left for {} on {} (booking {})",
                alert.customer,
                alert.resources.join(","),
                alert.booking_id
            );
            metrics::counter!(crate::observability::ALERTS_RAISED_TOTAL).increment(1);
            self.pending.insert((c.booking_id, threshold), alert.clone());
            let _ = self.tx.send(alert.clone());
            raised.push(alert);
        }
        raised
    }

    /// Alerts not yet acknowledged, oldest first.
    pub fn pending(&self) -> Vec<Alert> {
        let mut out: Vec<Alert> = self.pending.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| {
            a.raised_at
                .cmp(&b.raised_at)
                .then(b.threshold.cmp(&a.threshold))
                .then(a.booking_id.cmp(&b.booking_id))
        });
        out
    }

    /// Clear one alert. Returns false if it was not pending.
    pub fn ack(&self, booking_id: Ulid, threshold: u32) -> bool {
        self.pending.remove(&(booking_id, threshold)).is_some()
    }
}

/// Periodic scan over the engine's ongoing bookings.
pub async fn run_alert_scanner(
    engine: Arc<Engine>,
    alerts: Arc<AlertEngine>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = now_ms();
                let active = engine.countdowns(now).await;
                alerts.scan(now, &active);
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
