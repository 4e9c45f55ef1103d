use ulid::Ulid;

use crate::limits::MAX_RESOURCES_PER_BOOKING;
use crate::model::*;

use super::conflict::{find_conflict, validate_span};
use super::reconcile::Repair;
use super::{ConflictReason, Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ok,
    Conflict(ConflictReason),
}

impl Availability {
    pub fn is_ok(&self) -> bool {
        matches!(self, Availability::Ok)
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

/// Free sub-windows of `query` on one resource that last at least `min_duration`.
pub fn free_windows(rs: &ResourceState, query: &Span, min_duration: Ms) -> Vec<Span> {
    let busy: Vec<Span> = rs
        .overlapping(query)
        .filter(|r| r.note.is_exclusive())
        .map(|r| Span::new(r.span.start.max(query.start), r.span.end.min(query.end)))
        .collect();
    // Records are sorted by start, so the clamped spans are too.
    let busy = merge_overlapping(&busy);
    subtract_intervals(std::slice::from_ref(query), &busy)
        .into_iter()
        .filter(|s| s.duration_ms() >= min_duration)
        .collect()
}

/// Check a resource selection against its area and normalize it.
/// The room always resolves to its singleton key; seats are deduplicated and sorted.
pub(crate) fn resolve_resources(
    catalog: &Catalog,
    area: Area,
    requested: &[ResourceKey],
) -> Result<Vec<ResourceKey>, EngineError> {
    match area {
        Area::Room => {
            if requested.iter().any(|r| r != ROOM_KEY) {
                return Err(EngineError::Validation(
                    "room bookings cannot include seats".into(),
                ));
            }
            Ok(vec![ROOM_KEY.to_string()])
        }
        Area::Common => {
            if requested.is_empty() {
                return Err(EngineError::Validation("select at least one seat".into()));
            }
            if requested.len() > MAX_RESOURCES_PER_BOOKING {
                return Err(EngineError::LimitExceeded("too many seats in one booking"));
            }
            let mut seats = Vec::with_capacity(requested.len());
            for key in requested {
                let key = key.trim();
                if !catalog.is_seat(key) {
                    return Err(EngineError::Validation(format!("unknown seat {key}")));
                }
                seats.push(key.to_string());
            }
            seats.sort();
            seats.dedup();
            Ok(seats)
        }
    }
}

impl Engine {
    /// All-or-nothing availability of `resources` over `window`.
    ///
    /// (a) ledger records on every resource, then (b) bookings whose ledger
    /// write is still queued for repair. `owner` skips the caller's own records.
    pub async fn is_available(
        &self,
        area: Area,
        resources: &[ResourceKey],
        window: Span,
        owner: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        validate_span(&window)?;
        let resources = resolve_resources(&self.settings.catalog, area, resources)?;

        for key in &resources {
            let rs = self.resource(key)?;
            let guard = rs.read().await;
            if let Some(reason) = find_conflict(&guard, &window, owner) {
                return Ok(Availability::Conflict(reason));
            }
        }

        if let Some(reason) = self.unmirrored_conflict(&resources, &window, owner).await {
            return Ok(Availability::Conflict(reason));
        }
        Ok(Availability::Ok)
    }

    async fn unmirrored_conflict(
        &self,
        resources: &[ResourceKey],
        window: &Span,
        owner: Option<Ulid>,
    ) -> Option<ConflictReason> {
        let pending: Vec<Ulid> = self
            .pending
            .iter()
            .filter(|e| matches!(e.value(), Repair::Sync))
            .map(|e| *e.key())
            .filter(|id| Some(*id) != owner)
            .collect();

        for id in pending {
            let Some(shared) = self.booking_handle(&id) else {
                continue;
            };
            let b = shared.read().await;
            let Some(span) = super::reconcile::expected_span(&b) else {
                continue;
            };
            if !span.overlaps(window) {
                continue;
            }
            if let Some(resource) = b.resources.iter().find(|r| resources.contains(r)) {
                return Some(ConflictReason {
                    resource: resource.clone(),
                    occupied: span,
                    booking_id: Some(b.id),
                });
            }
        }
        None
    }
}
