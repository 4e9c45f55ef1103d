use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_windows;
use super::conflict::{check_no_conflict, validate_query_window, validate_span};
use super::{Engine, EngineError, SharedResourceState};

/// Identifies the record a truncate is aimed at: resource + source + original start.
/// `record_id` is preferred when several records share a start. Neither the
/// exact match nor the degraded fallback touches a record owned by a booking
/// other than `booking_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMatch {
    pub record_id: Option<Ulid>,
    pub booking_id: Option<Ulid>,
    pub source: Source,
    pub start: Ms,
}

impl RecordMatch {
    /// Unowned records, or records owned by `booking_id`.
    fn may_cut(&self, record: &BlockRecord) -> bool {
        record.booking_id.is_none() || record.booking_id == self.booking_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateOutcome {
    Exact,
    /// No exact match; the most recent open record with the same source was cut instead.
    Degraded(Ulid),
    /// The new end was at or before the start, so the record was dropped.
    Released,
    /// The record already ends at or before the new end.
    Unchanged,
}

/// Records covering one instant across every resource, stamped with the engine
/// revision read before the scan.
#[derive(Debug, Clone)]
pub struct OccupancySnapshot {
    pub revision: u64,
    pub at: Ms,
    pub records: Vec<BlockInfo>,
}

impl Engine {
    pub async fn block(&self, resource: &str, record: BlockRecord) -> Result<(), EngineError> {
        self.block_many(vec![(resource.to_string(), record)]).await
    }

    /// Block several resources atomically. All-or-nothing: if any record
    /// conflicts, none are written.
    ///
    /// Each resource's write lock is held from the conflict check through the
    /// insert, so two callers that both passed an earlier read-only check
    /// cannot both land here.
    pub async fn block_many(
        &self,
        requests: Vec<(ResourceKey, BlockRecord)>,
    ) -> Result<(), EngineError> {
        if requests.is_empty() {
            return Ok(());
        }
        if requests.len() > MAX_RESOURCES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many records in one block"));
        }
        for (_, record) in &requests {
            validate_span(&record.span)?;
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut keys: Vec<&str> = requests.iter().map(|(k, _)| k.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        let handles: Vec<SharedResourceState> = keys
            .iter()
            .map(|k| self.resource(k))
            .collect::<Result<_, _>>()?;
        let mut guards = Vec::with_capacity(handles.len());
        let mut slot = HashMap::new();
        for (key, rs) in keys.iter().zip(handles) {
            let guard = rs.write_owned().await;
            slot.insert(key.to_string(), guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against the ledger and within the batch.
        let mut fresh = Vec::with_capacity(requests.len());
        for (key, record) in requests {
            let guard = &guards[slot[&key]];
            if let Some(existing) = guard.record(record.id) {
                if existing.span == record.span && existing.source == record.source {
                    continue;
                }
                return Err(EngineError::AlreadyExists(record.id));
            }
            if guard.records.len() >= MAX_RECORDS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many records on resource"));
            }
            if record.note.is_exclusive() {
                if let Err(e) = check_no_conflict(guard, &record.span, None) {
                    metrics::counter!(crate::observability::CONFLICTS_TOTAL, "stage" => "constraint")
                        .increment(1);
                    tracing::debug!("ledger rejected block on {key}: {e}");
                    return Err(e);
                }
                let clash = fresh.iter().any(|(k, r): &(ResourceKey, BlockRecord)| {
                    *k == key && r.note.is_exclusive() && r.span.overlaps(&record.span)
                });
                if clash {
                    return Err(EngineError::Validation(format!(
                        "overlapping windows requested for {key}"
                    )));
                }
            }
            fresh.push((key, record));
        }

        // Phase 2: commit.
        for (key, record) in fresh {
            let guard = &mut guards[slot[&key]];
            let event = Event::Blocked {
                resource: key,
                record,
            };
            self.commit_ledger(guard, event).await?;
        }
        Ok(())
    }

    /// Shorten an active record so it ends at `new_end`. Never extends.
    pub async fn truncate(
        &self,
        resource: &str,
        target: RecordMatch,
        new_end: Ms,
    ) -> Result<TruncateOutcome, EngineError> {
        let rs = self.resource(resource)?;
        let mut guard = rs.write().await;

        let exact = guard
            .records
            .iter()
            .filter(|r| r.source == target.source && r.span.start == target.start)
            .filter(|r| target.may_cut(r))
            .max_by_key(|r| Some(r.id) == target.record_id)
            .map(|r| r.id);

        let (id, degraded) = match exact {
            Some(id) => (id, false),
            None => {
                let fallback = guard
                    .records
                    .iter()
                    .filter(|r| r.source == target.source && r.span.is_open())
                    .filter(|r| target.may_cut(r))
                    .max_by_key(|r| r.span.start)
                    .map(|r| r.id);
                let Some(id) = fallback else {
                    return Err(EngineError::NotFound(format!(
                        "{} record on {resource} starting at {}",
                        target.source.as_str(),
                        target.start
                    )));
                };
                tracing::warn!(
                    "degraded truncate on {resource}: no {} record starts at {}, cutting open record {id}",
                    target.source.as_str(),
                    target.start
                );
                metrics::counter!(crate::observability::DEGRADED_TRUNCATES_TOTAL).increment(1);
                (id, true)
            }
        };

        let Some(span) = guard.record(id).map(|r| r.span) else {
            return Err(EngineError::NotFound(format!("record {id}")));
        };
        if new_end >= span.end {
            return Ok(TruncateOutcome::Unchanged);
        }
        if new_end <= span.start {
            let event = Event::Released {
                resource: resource.to_string(),
                id,
            };
            self.commit_ledger(&mut guard, event).await?;
            return Ok(TruncateOutcome::Released);
        }
        let event = Event::Truncated {
            resource: resource.to_string(),
            id,
            end: new_end,
        };
        self.commit_ledger(&mut guard, event).await?;
        Ok(if degraded {
            TruncateOutcome::Degraded(id)
        } else {
            TruncateOutcome::Exact
        })
    }

    /// Delete a record. Returns false if it was already gone.
    pub async fn release(&self, resource: &str, id: Ulid) -> Result<bool, EngineError> {
        let rs = self.resource(resource)?;
        let mut guard = rs.write().await;
        if guard.record(id).is_none() {
            return Ok(false);
        }
        let event = Event::Released {
            resource: resource.to_string(),
            id,
        };
        self.commit_ledger(&mut guard, event).await?;
        Ok(true)
    }

    /// Every exclusive record intersecting `window` on any of `resources`,
    /// ordered by resource then start.
    pub async fn query_overlaps(
        &self,
        resources: &[ResourceKey],
        window: Span,
    ) -> Result<Vec<BlockInfo>, EngineError> {
        validate_query_window(&window)?;
        let mut keys: Vec<&ResourceKey> = resources.iter().collect();
        keys.sort();
        keys.dedup();

        let mut out = Vec::new();
        for key in keys {
            let rs = self.resource(key)?;
            let guard = rs.read().await;
            out.extend(
                guard
                    .overlapping(&window)
                    .filter(|r| r.note.is_exclusive())
                    .map(|r| BlockInfo::from_record(key, r)),
            );
        }
        Ok(out)
    }

    pub async fn free_slots(
        &self,
        resource: &str,
        window: Span,
        min_duration: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        validate_query_window(&window)?;
        let rs = self.resource(resource)?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &window, min_duration.max(1)))
    }

    /// Who holds what right now, for seeding a client cache.
    pub async fn occupancy(&self, now: Ms) -> OccupancySnapshot {
        let revision = self.revision();
        let handles: Vec<(ResourceKey, SharedResourceState)> = self
            .resources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut records = Vec::new();
        for (key, rs) in handles {
            let guard = rs.read().await;
            records.extend(
                guard
                    .records
                    .iter()
                    .filter(|r| r.span.contains_instant(now))
                    .map(|r| BlockInfo::from_record(&key, r)),
            );
        }
        records.sort_by(|a, b| a.resource.cmp(&b.resource).then(a.start.cmp(&b.start)));
        OccupancySnapshot {
            revision,
            at: now,
            records,
        }
    }
}
