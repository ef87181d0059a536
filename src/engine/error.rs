use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// Lot, spot, or reservation is gone. In release paths this means
    /// "already reconciled away" and callers should treat it as handled.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// `end <= start`.
    InvalidInterval { start: Ms, end: Ms },
    /// Booking window policy violated (must start in the future, must end
    /// within the horizon).
    InvalidBookingWindow(&'static str),
    /// No spot in the lot is free for the interval, or a conflicting
    /// reservation appeared between availability check and commit.
    /// Transient: retry from preview.
    SpotNoLongerAvailable(Ulid),
    /// Reservation ownership mismatch.
    Forbidden(Ulid),
    /// Lot/spot deletion blocked by an active-or-future reservation.
    ConstraintViolation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for rejections the caller can resolve by re-previewing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SpotNoLongerAvailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end})")
            }
            EngineError::InvalidBookingWindow(msg) => {
                write!(f, "invalid booking window: {msg}")
            }
            EngineError::SpotNoLongerAvailable(lot_id) => {
                write!(f, "no spot available in lot {lot_id} for this interval")
            }
            EngineError::Forbidden(id) => {
                write!(f, "reservation {id} belongs to another user")
            }
            EngineError::ConstraintViolation(msg) => {
                write!(f, "constraint violation: {msg}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
