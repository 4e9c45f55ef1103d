use ulid::Ulid;

use crate::clock::format_instant;
use crate::model::{ResourceKey, Span};

/// Which resource is taken, by what, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReason {
    pub resource: ResourceKey,
    pub occupied: Span,
    pub booking_id: Option<Ulid>,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} is occupied from {} to {}",
            self.resource,
            format_instant(self.occupied.start),
            format_instant(self.occupied.end)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoError {
    NotFound,
    Expired,
    NoAttemptsLeft,
    AlreadyCheckedIn,
    NoOpenCheckIn,
}

impl std::fmt::Display for PromoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromoError::NotFound => write!(f, "promo code not found"),
            PromoError::Expired => write!(f, "promo code has expired"),
            PromoError::NoAttemptsLeft => write!(f, "promo code has no check-ins left"),
            PromoError::AlreadyCheckedIn => write!(f, "already checked in today"),
            PromoError::NoOpenCheckIn => write!(f, "no open check-in for today"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(ConflictReason),
    NotFound(String),
    AlreadyExists(Ulid),
    Promo(PromoError),
    /// The booking and the ledger disagree and a repair is queued.
    InconsistentState {
        booking_id: Ulid,
        detail: String,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(id: Ulid) -> Self {
        EngineError::NotFound(format!("booking {id}"))
    }

    /// Text safe to show at the front desk. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(msg) => msg.clone(),
            EngineError::Conflict(reason) => {
                format!("not available for the selected schedule ({reason})")
            }
            EngineError::NotFound(what) => format!("{what} not found"),
            EngineError::AlreadyExists(_) => "this booking already exists".to_string(),
            EngineError::Promo(e) => e.to_string(),
            EngineError::InconsistentState { .. } => "saved, resource release pending".to_string(),
            EngineError::LimitExceeded(msg) => msg.to_string(),
            EngineError::WalError(_) => "could not save, please try again".to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(reason) => write!(f, "conflict: {reason}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Promo(e) => write!(f, "{e}"),
            EngineError::InconsistentState { booking_id, detail } => {
                write!(f, "booking {booking_id} out of sync with ledger: {detail}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PromoError> for EngineError {
    fn from(e: PromoError) -> Self {
        EngineError::Promo(e)
    }
}
