use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    booking_cost, check_spot_free, collect_conflicts, find_available_spot, now_ms,
    validate_booking_window, validate_interval,
};
use super::reconcile::ReconcileScope;
use super::{Engine, EngineError, WalCommand, detach_spot_history};

fn validate_lot_fields(
    city: &str,
    pincode: &str,
    address: &str,
    price_per_hour: Cents,
) -> Result<(), EngineError> {
    if city.len() > MAX_FIELD_LEN || pincode.len() > MAX_FIELD_LEN || address.len() > MAX_FIELD_LEN
    {
        return Err(EngineError::LimitExceeded("lot field too long"));
    }
    if !(0..=MAX_PRICE_PER_HOUR).contains(&price_per_hour) {
        return Err(EngineError::LimitExceeded("price per hour out of range"));
    }
    Ok(())
}

impl Engine {
    // ── Lot and spot lifecycle ───────────────────────────────

    /// Create a lot and provision `spot_count` fresh spots.
    /// Returns the new spot ids, ascending.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_lot(
        &self,
        id: Ulid,
        city: String,
        pincode: String,
        area_type: AreaType,
        price_per_hour: Cents,
        address: String,
        spot_count: usize,
    ) -> Result<Vec<Ulid>, EngineError> {
        if self.lots.len() >= MAX_LOTS {
            return Err(EngineError::LimitExceeded("too many lots"));
        }
        validate_lot_fields(&city, &pincode, &address, price_per_hour)?;
        if spot_count == 0 || spot_count > MAX_SPOTS_PER_LOT {
            return Err(EngineError::LimitExceeded("spot count out of range"));
        }

        let mut spot_ids: Vec<Ulid> = (0..spot_count).map(|_| Ulid::new()).collect();
        spot_ids.sort();

        let lot = LotState::new(
            id,
            city.clone(),
            pincode.clone(),
            area_type,
            price_per_hour,
            address.clone(),
            spot_ids.clone(),
        );
        let shared = Arc::new(RwLock::new(lot));
        // Pre-lock the fresh lot (sole owner, cannot block), then claim the
        // id. The entry scope is the atomic existence-check-and-insert; the
        // held write lock makes the lot invisible to other writers until
        // the LotCreated append is durable, keeping WAL order causal.
        let mut guard = shared
            .clone()
            .try_write_owned()
            .expect("fresh lot lock is uncontended");
        match self.lots.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }

        let event = Event::LotCreated {
            id,
            city,
            pincode,
            area_type,
            price_per_hour,
            address,
            spot_ids: spot_ids.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            guard.deleted = true;
            self.lots.remove(&id);
            return Err(e);
        }
        for spot_id in &spot_ids {
            self.entity_to_lot.insert(*spot_id, id);
        }
        drop(guard);
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::LOTS_ACTIVE).set(self.lots.len() as f64);
        Ok(spot_ids)
    }

    /// Update lot metadata and price. Spots are untouched; price changes
    /// affect future bookings only (committed costs are frozen).
    pub async fn update_lot(
        &self,
        id: Ulid,
        city: String,
        pincode: String,
        area_type: AreaType,
        price_per_hour: Cents,
        address: String,
    ) -> Result<(), EngineError> {
        validate_lot_fields(&city, &pincode, &address, price_per_hour)?;
        let mut guard = self.lot_write(id).await?;

        let event = Event::LotUpdated {
            id,
            city,
            pincode,
            area_type,
            price_per_hour,
            address,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn delete_lot(&self, id: Ulid) -> Result<(), EngineError> {
        self.delete_lot_at(id, now_ms()).await
    }

    /// Delete a lot. Fails with `ConstraintViolation` while any spot has an
    /// active-or-future reservation. Past reservations are expired to
    /// history first; their records survive with the spot reference nulled.
    pub async fn delete_lot_at(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let mut guard = self.lot_write(id).await?;
        self.reconcile_lot(id, &mut guard, ReconcileScope::All, now)
            .await?;
        if !guard.can_delete_lot(now) {
            return Err(EngineError::ConstraintViolation(
                "lot has active or future reservations",
            ));
        }

        let event = Event::LotDeleted { id };
        self.wal_append(&event).await?;
        // Tombstone before the state leaves the map: a writer already
        // holding the Arc will observe it once it wins the lock.
        guard.deleted = true;
        detach_spot_history(&self.history, &guard.spots);
        for spot_id in &guard.spots {
            self.entity_to_lot.remove(spot_id);
        }
        self.lots.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(crate::observability::LOTS_ACTIVE).set(self.lots.len() as f64);
        Ok(())
    }

    /// Increase lot capacity by one spot. Returns the new spot id.
    pub async fn add_spot(&self, lot_id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.lot_write(lot_id).await?;
        if guard.spots.len() >= MAX_SPOTS_PER_LOT {
            return Err(EngineError::LimitExceeded("too many spots in lot"));
        }

        let spot_id = Ulid::new();
        let event = Event::SpotAdded { lot_id, spot_id };
        self.persist_and_apply(lot_id, &mut guard, &event).await?;
        Ok(spot_id)
    }

    pub async fn remove_spot(&self, spot_id: Ulid) -> Result<(), EngineError> {
        self.remove_spot_at(spot_id, now_ms()).await
    }

    /// Delete a spot. Fails with `ConstraintViolation` while the spot has a
    /// current or future reservation. History records keep their data; the
    /// spot back-reference is nulled.
    pub async fn remove_spot_at(&self, spot_id: Ulid, now: Ms) -> Result<(), EngineError> {
        let (lot_id, mut guard) = self.resolve_entity_write(&spot_id).await?;
        if !guard.has_spot(spot_id) {
            return Err(EngineError::NotFound(spot_id));
        }
        self.reconcile_lot(lot_id, &mut guard, ReconcileScope::All, now)
            .await?;
        if !guard.can_delete_spot(spot_id, now) {
            return Err(EngineError::ConstraintViolation(
                "spot has active or future reservations",
            ));
        }

        let event = Event::SpotRemoved { lot_id, spot_id };
        self.persist_and_apply(lot_id, &mut guard, &event).await
    }

    // ── Booking orchestrator ─────────────────────────────────

    pub async fn preview_booking(
        &self,
        lot_id: Ulid,
        interval: Interval,
    ) -> Result<Preview, EngineError> {
        self.preview_booking_at(lot_id, interval, now_ms()).await
    }

    /// Answer "can I book lot L for interval I?" without committing
    /// anything. State is brought current first, so a spot freed by an
    /// expired reservation counts as available.
    pub async fn preview_booking_at(
        &self,
        lot_id: Ulid,
        interval: Interval,
        now: Ms,
    ) -> Result<Preview, EngineError> {
        validate_interval(&interval)?;
        let mut guard = self.lot_write(lot_id).await?;
        self.reconcile_lot(lot_id, &mut guard, ReconcileScope::All, now)
            .await?;

        Ok(Preview {
            available: find_available_spot(&guard, &interval).is_some(),
            estimated_cost: booking_cost(&interval, guard.price_per_hour),
            conflicts: collect_conflicts(&guard, &interval),
        })
    }

    pub async fn confirm_booking(
        &self,
        user_id: Ulid,
        lot_id: Ulid,
        interval: Interval,
        vehicle_no: String,
    ) -> Result<Reservation, EngineError> {
        self.confirm_booking_at(user_id, lot_id, interval, vehicle_no, now_ms())
            .await
    }

    /// Commit a reservation: fresh spot search (never reuses a preview),
    /// then commit-time re-validation immediately before insert. Concurrent
    /// confirms for the same lot serialize on the lot write lock; the loser
    /// gets `SpotNoLongerAvailable` and should retry from preview.
    pub async fn confirm_booking_at(
        &self,
        user_id: Ulid,
        lot_id: Ulid,
        interval: Interval,
        vehicle_no: String,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        validate_interval(&interval)?;
        validate_booking_window(&interval, now)?;
        if vehicle_no.len() > MAX_VEHICLE_NO_LEN {
            return Err(EngineError::LimitExceeded("vehicle number too long"));
        }
        let mut guard = self.lot_write(lot_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_LOT {
            return Err(EngineError::LimitExceeded("too many reservations in lot"));
        }
        self.reconcile_lot(lot_id, &mut guard, ReconcileScope::All, now)
            .await?;

        let Some(spot_id) = find_available_spot(&guard, &interval) else {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(EngineError::SpotNoLongerAvailable(lot_id));
        };
        // Re-validate right before insert. Under the lot write lock this
        // cannot fail today, but commit must never trust an earlier check.
        if let Err(e) = check_spot_free(&guard, spot_id, &interval) {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            user_id,
            spot_id,
            interval,
            cost: booking_cost(&interval, guard.price_per_hour),
            vehicle_no: vehicle_no.clone(),
            activated: false,
        };
        let event = Event::ReservationCommitted {
            id: reservation.id,
            lot_id,
            user_id,
            spot_id,
            interval,
            cost: reservation.cost,
            vehicle_no,
            activated: false,
        };
        self.persist_and_apply(lot_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        Ok(reservation)
    }

    pub async fn release_booking(
        &self,
        reservation_id: Ulid,
        user_id: Ulid,
    ) -> Result<HistoryRecord, EngineError> {
        self.release_booking_at(reservation_id, user_id, now_ms())
            .await
    }

    /// Release (after start) or cancel (before start) an owned reservation.
    /// Both paths produce the same history record, distinguished only by
    /// the `cancelled` flag. `NotFound` means reconciliation already
    /// expired it — callers should treat that as handled, not as failure.
    pub async fn release_booking_at(
        &self,
        reservation_id: Ulid,
        user_id: Ulid,
        now: Ms,
    ) -> Result<HistoryRecord, EngineError> {
        let (lot_id, mut guard) = self.resolve_entity_write(&reservation_id).await?;
        let record = {
            let r = guard
                .reservation(reservation_id)
                .ok_or(EngineError::NotFound(reservation_id))?;
            if r.user_id != user_id {
                return Err(EngineError::Forbidden(reservation_id));
            }
            HistoryRecord {
                reservation_id: r.id,
                user_id: r.user_id,
                spot_id: Some(r.spot_id),
                interval: r.interval,
                cost: r.cost,
                vehicle_no: r.vehicle_no.clone(),
                cancelled: !r.interval.has_started(now),
                closed_at: now,
            }
        };

        let event = Event::ReservationClosed {
            lot_id,
            record: record.clone(),
        };
        self.persist_and_apply(lot_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_RELEASED_TOTAL).increment(1);
        Ok(record)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: each lot with its spots, each active
    /// reservation, and the history log.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut visited = HashSet::new();

        let lot_ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        for id in lot_ids {
            if !visited.insert(id) {
                continue;
            }
            let Some(lot) = self.get_lot(&id) else { continue };
            let guard = lot.read().await;
            if guard.deleted {
                continue;
            }

            events.push(Event::LotCreated {
                id: guard.id,
                city: guard.city.clone(),
                pincode: guard.pincode.clone(),
                area_type: guard.area_type,
                price_per_hour: guard.price_per_hour,
                address: guard.address.clone(),
                spot_ids: guard.spots.clone(),
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCommitted {
                    id: r.id,
                    lot_id: guard.id,
                    user_id: r.user_id,
                    spot_id: r.spot_id,
                    interval: r.interval,
                    cost: r.cost,
                    vehicle_no: r.vehicle_no.clone(),
                    activated: r.activated,
                });
            }
        }

        // History last: records may reference lots/spots that no longer
        // exist, so they get the standalone form.
        for entry in self.history.iter() {
            for record in entry.value() {
                events.push(Event::HistoryRecorded {
                    record: record.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
