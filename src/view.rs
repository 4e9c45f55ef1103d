use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::clock::now_ms;
use crate::engine::{Engine, OccupancySnapshot};
use crate::model::*;
use crate::notify::{Change, LEDGER_CHANNEL};

#[derive(Debug, Clone)]
struct Slot {
    revision: u64,
    /// `None` is a tombstone: released at `revision`.
    info: Option<BlockInfo>,
}

/// Cached copy of the ledger's occupancy, fed by snapshots and pushed changes.
/// Each record keeps whichever version carries the highest revision.
#[derive(Default)]
pub struct OccupancyView {
    slots: DashMap<Ulid, Slot>,
    revision: AtomicU64,
}

impl OccupancyView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest revision merged so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn bump(&self, revision: u64) {
        self.revision.fetch_max(revision, Ordering::SeqCst);
    }

    /// Merge one pushed change. Returns false if it was stale or not a ledger change.
    pub fn apply(&self, change: &Change) -> bool {
        let (id, info) = match &change.event {
            Event::Blocked { resource, record } => {
                (record.id, Some(BlockInfo::from_record(resource, record)))
            }
            Event::Truncated { id, end, .. } => {
                let Some(mut info) = self.slots.get(id).and_then(|s| s.info.clone()) else {
                    return false;
                };
                info.end = *end;
                (*id, Some(info))
            }
            Event::Released { id, .. } => (*id, None),
            _ => return false,
        };
        let mut slot = self.slots.entry(id).or_insert(Slot {
            revision: 0,
            info: None,
        });
        if slot.revision >= change.revision {
            return false;
        }
        *slot = Slot {
            revision: change.revision,
            info,
        };
        drop(slot);
        self.bump(change.revision);
        true
    }

    /// Reconcile against a full snapshot. Anything newer than the snapshot survives.
    pub fn refresh(&self, snapshot: &OccupancySnapshot) {
        let rev = snapshot.revision;
        self.slots.retain(|_, slot| slot.revision > rev);
        for info in &snapshot.records {
            if self.slots.contains_key(&info.id) {
                continue;
            }
            self.slots.insert(
                info.id,
                Slot {
                    revision: rev,
                    info: Some(info.clone()),
                },
            );
        }
        self.bump(rev);
    }

    /// Records covering `now`, ordered by resource.
    pub fn occupied(&self, now: Ms) -> Vec<BlockInfo> {
        let mut out: Vec<BlockInfo> = self
            .slots
            .iter()
            .filter_map(|e| e.value().info.clone())
            .filter(|i| i.start <= now && now < i.end)
            .collect();
        out.sort_by(|a, b| a.resource.cmp(&b.resource).then(a.start.cmp(&b.start)));
        out
    }

    pub fn is_occupied(&self, resource: &str, now: Ms) -> bool {
        self.slots.iter().any(|e| {
            e.value()
                .info
                .as_ref()
                .is_some_and(|i| i.resource == resource && i.start <= now && now < i.end)
        })
    }
}

/// Keep a view fresh: merge pushed ledger changes as they arrive and re-seed
/// from a snapshot on every poll tick or whenever the push stream lags.
pub async fn run_view_sync(
    engine: Arc<Engine>,
    view: Arc<OccupancyView>,
    poll: Duration,
    shutdown: CancellationToken,
) {
    let mut rx = engine.notify.subscribe(LEDGER_CHANNEL);
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                view.refresh(&engine.occupancy(now_ms()).await);
            }
            msg = rx.recv() => match msg {
                Ok(change) => {
                    view.apply(&change);
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("occupancy view lagged {n} changes, refreshing");
                    view.refresh(&engine.occupancy(now_ms()).await);
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }
}
