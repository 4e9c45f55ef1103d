use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{ConflictReason, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("window must end after it starts".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS
        || (span.end > MAX_VALID_TIMESTAMP_MS && !span.is_open())
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if !span.is_open() && span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_query_window(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("window must end after it starts".into()));
    }
    if span.duration_ms() > MAX_QUERY_WINDOW_MS && !span.is_open() {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// First exclusive record overlapping `span`. Mirrors never conflict, and records
/// owned by `owner` are the caller's own and are skipped.
pub(crate) fn find_conflict(
    rs: &ResourceState,
    span: &Span,
    owner: Option<Ulid>,
) -> Option<ConflictReason> {
    rs.overlapping(span)
        .filter(|r| r.note.is_exclusive())
        .find(|r| owner.is_none() || r.booking_id != owner)
        .map(|r| ConflictReason {
            resource: rs.key.clone(),
            occupied: r.span,
            booking_id: r.booking_id,
        })
}

pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    owner: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, span, owner) {
        Some(reason) => Err(EngineError::Conflict(reason)),
        None => Ok(()),
    }
}
