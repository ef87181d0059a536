//! Hard limits. Every externally supplied value is bounded before it can
//! reach the WAL or the in-memory state.

use crate::model::{Cents, Ms};

/// Earliest accepted timestamp (unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Bookings may not end further in the future than this (10 days).
pub const MAX_BOOKING_HORIZON_MS: Ms = 10 * 24 * 3_600_000;

pub const MAX_LOTS: usize = 10_000;
pub const MAX_SPOTS_PER_LOT: usize = 5_000;
pub const MAX_RESERVATIONS_PER_LOT: usize = 100_000;

/// Longest lot text field (the address, per the admin data model).
pub const MAX_FIELD_LEN: usize = 150;
pub const MAX_VEHICLE_NO_LEN: usize = 12;

/// Price per hour is bounded at 10 000.00, in cents.
pub const MAX_PRICE_PER_HOUR: Cents = 1_000_000;

/// `list_history` never returns more than this many records.
pub const MAX_HISTORY_LIMIT: usize = 1_000;
