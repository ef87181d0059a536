use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Integer cents — the only money type. Two-decimal rounding is built in.
pub type Cents = i64;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Ms,
    pub end: Ms,
}

impl Interval {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open semantics: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    pub fn has_started(&self, now: Ms) -> bool {
        self.start <= now
    }

    pub fn has_ended(&self, now: Ms) -> bool {
        self.end <= now
    }
}

/// Lot classification (carried over from the admin data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaType {
    City,
    TouristPlace,
    Both,
}

/// Physical status of a spot. Never stored — always derived from the
/// reservation set at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotStatus {
    Available,
    Occupied,
}

/// An active (committed, not yet expired) reservation of one spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub spot_id: Ulid,
    pub interval: Interval,
    pub cost: Cents,
    pub vehicle_no: String,
    /// Set once the activation notification for this reservation has been
    /// emitted. Keeps reconciliation idempotent; status itself is derived.
    pub activated: bool,
}

/// Immutable record of a completed, released, or cancelled reservation.
/// Append-only; `spot_id` is nulled if the spot is later deleted, but the
/// record itself is never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub reservation_id: Ulid,
    pub user_id: Ulid,
    pub spot_id: Option<Ulid>,
    pub interval: Interval,
    pub cost: Cents,
    pub vehicle_no: String,
    /// True when the reservation was released before it started.
    pub cancelled: bool,
    pub closed_at: Ms,
}

/// In-memory state of one parking lot: its metadata, its spots, and the
/// active reservations across all of its spots.
#[derive(Debug, Clone)]
pub struct LotState {
    pub id: Ulid,
    pub city: String,
    pub pincode: String,
    pub area_type: AreaType,
    pub price_per_hour: Cents,
    pub address: String,
    /// Spot ids, sorted ascending. The lowest free spot id wins ties.
    pub spots: Vec<Ulid>,
    /// Active reservations, sorted by `interval.start`.
    pub reservations: Vec<Reservation>,
    /// Tombstone set on lot deletion. A writer may clone the lot's `Arc`
    /// before the lot leaves the engine's map and only then acquire the
    /// lock; this flag is what tells it the state is dead.
    pub deleted: bool,
}

impl LotState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Ulid,
        city: String,
        pincode: String,
        area_type: AreaType,
        price_per_hour: Cents,
        address: String,
        mut spots: Vec<Ulid>,
    ) -> Self {
        spots.sort();
        Self {
            id,
            city,
            pincode,
            area_type,
            price_per_hour,
            address,
            spots,
            reservations: Vec::new(),
            deleted: false,
        }
    }

    pub fn has_spot(&self, spot_id: Ulid) -> bool {
        self.spots.binary_search(&spot_id).is_ok()
    }

    /// Insert a spot id maintaining sort order. No-op on duplicates.
    pub fn add_spot(&mut self, spot_id: Ulid) {
        if let Err(pos) = self.spots.binary_search(&spot_id) {
            self.spots.insert(pos, spot_id);
        }
    }

    pub fn remove_spot(&mut self, spot_id: Ulid) -> bool {
        match self.spots.binary_search(&spot_id) {
            Ok(pos) => {
                self.spots.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Insert a reservation maintaining sort order by `interval.start`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.interval.start, |r| r.interval.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any spot) whose interval overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Interval) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.interval.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.interval.end > query.start)
    }

    /// Reservations for one spot whose interval overlaps the query window.
    /// Availability testing and rejection diagnostics both go through here.
    pub fn conflicting(&self, spot_id: Ulid, query: &Interval) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(move |r| r.spot_id == spot_id)
    }

    /// Derived physical status: Occupied iff some reservation for the spot
    /// contains `now`.
    pub fn spot_status(&self, spot_id: Ulid, now: Ms) -> SpotStatus {
        let occupied = self
            .reservations
            .iter()
            .any(|r| r.spot_id == spot_id && r.interval.contains(now));
        if occupied {
            SpotStatus::Occupied
        } else {
            SpotStatus::Available
        }
    }

    /// A spot may be deleted only when it has no current or future
    /// reservation.
    pub fn can_delete_spot(&self, spot_id: Ulid, now: Ms) -> bool {
        !self
            .reservations
            .iter()
            .any(|r| r.spot_id == spot_id && r.interval.end > now)
    }

    /// A lot may be deleted only when every one of its spots may be.
    pub fn can_delete_lot(&self, now: Ms) -> bool {
        !self.reservations.iter().any(|r| r.interval.end > now)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LotCreated {
        id: Ulid,
        city: String,
        pincode: String,
        area_type: AreaType,
        price_per_hour: Cents,
        address: String,
        spot_ids: Vec<Ulid>,
    },
    LotUpdated {
        id: Ulid,
        city: String,
        pincode: String,
        area_type: AreaType,
        price_per_hour: Cents,
        address: String,
    },
    LotDeleted {
        id: Ulid,
    },
    SpotAdded {
        lot_id: Ulid,
        spot_id: Ulid,
    },
    SpotRemoved {
        lot_id: Ulid,
        spot_id: Ulid,
    },
    ReservationCommitted {
        id: Ulid,
        lot_id: Ulid,
        user_id: Ulid,
        spot_id: Ulid,
        interval: Interval,
        cost: Cents,
        vehicle_no: String,
        activated: bool,
    },
    ReservationActivated {
        id: Ulid,
        lot_id: Ulid,
    },
    /// The single atomic transition from active set to history log.
    /// The record carries everything; apply = remove active + append history.
    ReservationClosed {
        lot_id: Ulid,
        record: HistoryRecord,
    },
    /// Compaction-only form of a history record whose lot may no longer
    /// exist. Apply = append history.
    HistoryRecorded {
        record: HistoryRecord,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotInfo {
    pub id: Ulid,
    pub city: String,
    pub pincode: String,
    pub area_type: AreaType,
    pub price_per_hour: Cents,
    pub address: String,
    pub spot_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotSnapshot {
    pub spot_id: Ulid,
    pub status: SpotStatus,
}

/// One conflicting reservation, for rejection diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotConflict {
    pub spot_id: Ulid,
    pub interval: Interval,
}

/// Result of a booking preview. Inserts nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub available: bool,
    pub estimated_cost: Cents,
    pub conflicts: Vec<SpotConflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Activated,
    Expired,
}

/// Lifecycle transitions surfaced by one reconciliation pass. Zero-count
/// entries are omitted; no notifications is the normal, silent case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub count: usize,
}
