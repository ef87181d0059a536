use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_interval(interval: &Interval) -> Result<(), EngineError> {
    use crate::limits::*;
    if interval.end <= interval.start {
        return Err(EngineError::InvalidInterval {
            start: interval.start,
            end: interval.end,
        });
    }
    if interval.start < MIN_VALID_TIMESTAMP_MS || interval.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Booking window policy: the interval must lie strictly in the future and
/// end within the horizon. Shape errors are caught by `validate_interval`
/// first, so only window placement is checked here.
pub(crate) fn validate_booking_window(interval: &Interval, now: Ms) -> Result<(), EngineError> {
    if interval.start <= now {
        return Err(EngineError::InvalidBookingWindow("must start in the future"));
    }
    if interval.end > now + crate::limits::MAX_BOOKING_HORIZON_MS {
        return Err(EngineError::InvalidBookingWindow("ends beyond the booking horizon"));
    }
    Ok(())
}

const HOUR_MS: Ms = 3_600_000;

/// Cost of occupying a spot for `interval` at `price_per_hour`, rounded
/// half-up to the nearest cent. Integer arithmetic throughout.
pub fn booking_cost(interval: &Interval, price_per_hour: Cents) -> Cents {
    (interval.duration_ms() * price_per_hour + HOUR_MS / 2) / HOUR_MS
}

/// First spot (ascending id — deterministic, starvation-free tie-break)
/// with zero conflicting reservations for the interval.
pub(crate) fn find_available_spot(lot: &LotState, interval: &Interval) -> Option<Ulid> {
    lot.spots
        .iter()
        .copied()
        .find(|&spot_id| lot.conflicting(spot_id, interval).next().is_none())
}

/// Commit-time re-validation: the spot must still have zero conflicts.
/// Closes the race between availability check and insert.
pub(crate) fn check_spot_free(
    lot: &LotState,
    spot_id: Ulid,
    interval: &Interval,
) -> Result<(), EngineError> {
    if lot.conflicting(spot_id, interval).next().is_some() {
        return Err(EngineError::SpotNoLongerAvailable(lot.id));
    }
    Ok(())
}

/// Every reservation in the lot that overlaps the interval, as diagnostics
/// for a rejected or previewed booking.
pub(crate) fn collect_conflicts(lot: &LotState, interval: &Interval) -> Vec<SpotConflict> {
    lot.overlapping(interval)
        .map(|r| SpotConflict {
            spot_id: r.spot_id,
            interval: r.interval,
        })
        .collect()
}
