use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::ledger::RecordMatch;
use super::{Engine, EngineError};

/// Outstanding ledger work for one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    /// Bring the booking's ledger records in line with its window.
    Sync,
    /// Undo a create that failed half-way: drop its records and the booking.
    Rollback,
    /// Records that name a booking which no longer exists.
    Orphans(Vec<LedgerRef>),
}

impl Repair {
    pub fn as_str(&self) -> &'static str {
        match self {
            Repair::Sync => "sync",
            Repair::Rollback => "rollback",
            Repair::Orphans(_) => "orphans",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub repaired: usize,
    pub failed: usize,
}

/// The window a booking's ledger records should cover right now, if any.
/// Cancellation keeps elapsed time and drops the rest.
pub(crate) fn expected_span(b: &Booking) -> Option<Span> {
    let end = match b.cancelled_at {
        Some(at) => b.end.min(at),
        None => b.end,
    };
    (b.start < end).then(|| Span {
        start: b.start,
        end,
    })
}

impl Engine {
    /// Queue a repair and turn a failure into `InconsistentState`.
    pub(super) fn flag(&self, booking_id: Ulid, repair: Repair, detail: String) -> EngineError {
        tracing::error!(
            "booking {booking_id} out of sync with ledger, queued {}: {detail}",
            repair.as_str()
        );
        self.pending.insert(booking_id, repair);
        self.publish_pending_gauge();
        EngineError::InconsistentState { booking_id, detail }
    }

    fn publish_pending_gauge(&self) {
        metrics::gauge!(crate::observability::PENDING_REPAIRS).set(self.pending.len() as f64);
    }

    pub fn pending_repairs(&self) -> Vec<(Ulid, Repair)> {
        let mut out: Vec<_> = self
            .pending
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Make the ledger match one booking. Safe to repeat.
    pub(super) async fn sync_ledger(&self, b: &Booking) -> Result<(), EngineError> {
        let expected = expected_span(b);
        let mut missing = Vec::new();
        for r in &b.ledger {
            let current = {
                let rs = self.resource(&r.resource)?;
                let guard = rs.read().await;
                guard.record(r.record_id).map(|rec| rec.span)
            };
            match (expected, current) {
                (None, None) => {}
                (None, Some(_)) => {
                    self.release(&r.resource, r.record_id).await?;
                }
                (Some(span), None) => missing.push((
                    r.resource.clone(),
                    BlockRecord {
                        id: r.record_id,
                        span,
                        source: b.source(),
                        note: b.note(),
                        booking_id: Some(b.id),
                    },
                )),
                (Some(span), Some(cur)) if cur.end > span.end => {
                    let target = RecordMatch {
                        record_id: Some(r.record_id),
                        booking_id: Some(b.id),
                        source: b.source(),
                        start: cur.start,
                    };
                    self.truncate(&r.resource, target, span.end).await?;
                }
                (Some(span), Some(cur)) if cur != span => {
                    tracing::warn!(
                        "booking {} record {} on {} is shorter than its window; leaving it",
                        b.id,
                        r.record_id,
                        r.resource
                    );
                }
                _ => {}
            }
        }
        self.block_many(missing).await
    }

    /// True if any of the booking's records differs from what it should be.
    async fn drifted(&self, b: &Booking) -> bool {
        let expected = expected_span(b);
        for r in &b.ledger {
            let Ok(rs) = self.resource(&r.resource) else {
                return true;
            };
            let current = rs.read().await.record(r.record_id).map(|rec| rec.span);
            let ok = match (expected, current) {
                (None, None) => true,
                (Some(span), Some(cur)) => cur.end <= span.end,
                _ => false,
            };
            if !ok {
                return true;
            }
        }
        false
    }

    /// Release a booking's records and hard-delete it. Caller holds the booking lock.
    pub(super) async fn discard(&self, b: &mut Booking) -> Result<(), EngineError> {
        let refs = b.ledger.clone();
        for r in &refs {
            self.release(&r.resource, r.record_id).await?;
        }
        let id = b.id;
        self.commit_booking(b, Event::BookingPurged { id }).await?;
        self.bookings.remove(&id);
        Ok(())
    }

    /// Cross-check every booking against the ledger and queue repairs for
    /// anything out of line. Run once after startup replay.
    pub async fn verify_ledger(&self) -> usize {
        let mut owned: HashMap<Ulid, Vec<LedgerRef>> = HashMap::new();
        let resources: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        for rs in resources {
            let guard = rs.read().await;
            for rec in &guard.records {
                if let Some(bid) = rec.booking_id {
                    owned.entry(bid).or_default().push(LedgerRef {
                        resource: guard.key.clone(),
                        record_id: rec.id,
                    });
                }
            }
        }

        let bookings: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut queued = 0;
        for shared in bookings {
            let b = shared.read().await;
            owned.remove(&b.id);
            if self.drifted(&b).await {
                tracing::warn!("booking {} ledger records drifted; queueing sync", b.id);
                self.pending.insert(b.id, Repair::Sync);
                queued += 1;
            }
        }
        for (bid, refs) in owned {
            tracing::warn!("{} ledger records name missing booking {bid}; queueing release", refs.len());
            self.pending.insert(bid, Repair::Orphans(refs));
            queued += 1;
        }
        self.publish_pending_gauge();
        queued
    }

    /// Retry every queued repair once.
    pub async fn reconcile_pending(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (id, repair) in self.pending_repairs() {
            let result = match &repair {
                Repair::Sync => self.resync(id).await,
                Repair::Rollback => self.rollback(id).await,
                Repair::Orphans(refs) => self.release_orphans(refs).await,
            };
            match result {
                Ok(()) => {
                    self.pending.remove_if(&id, |_, r| *r == repair);
                    tracing::info!("repaired ledger for booking {id} ({})", repair.as_str());
                    report.repaired += 1;
                }
                Err(EngineError::Conflict(reason)) => {
                    tracing::error!(
                        "booking {id} cannot get its window back ({reason}); needs manual reconciliation"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!("repair of booking {id} failed, will retry: {e}");
                    report.failed += 1;
                }
            }
        }
        self.publish_pending_gauge();
        report
    }

    async fn resync(&self, id: Ulid) -> Result<(), EngineError> {
        let Some(shared) = self.booking_handle(&id) else {
            return Ok(());
        };
        let b = shared.write().await;
        self.sync_ledger(&b).await
    }

    async fn rollback(&self, id: Ulid) -> Result<(), EngineError> {
        let Some(shared) = self.booking_handle(&id) else {
            return Ok(());
        };
        let mut b = shared.write().await;
        self.discard(&mut b).await
    }

    async fn release_orphans(&self, refs: &[LedgerRef]) -> Result<(), EngineError> {
        for r in refs {
            self.release(&r.resource, r.record_id).await?;
        }
        Ok(())
    }
}
