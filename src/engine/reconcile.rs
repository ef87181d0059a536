use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Which reservations a reconciliation pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileScope {
    All,
    ForUser(Ulid),
}

impl ReconcileScope {
    fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReconcileScope::All => true,
            ReconcileScope::ForUser(user_id) => reservation.user_id == *user_id,
        }
    }
}

/// Counts of lifecycle transitions produced by one pass over one lot.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Transitions {
    pub activated: usize,
    pub expired: usize,
}

impl Transitions {
    fn absorb(&mut self, other: Transitions) {
        self.activated += other.activated;
        self.expired += other.expired;
    }

    fn into_notifications(self) -> Vec<Notification> {
        let mut out = Vec::new();
        if self.activated > 0 {
            out.push(Notification {
                kind: NotificationKind::Activated,
                count: self.activated,
            });
        }
        if self.expired > 0 {
            out.push(Notification {
                kind: NotificationKind::Expired,
                count: self.expired,
            });
        }
        out
    }
}

impl Engine {
    /// Bring reservation state current: expire ended reservations to
    /// history and surface activations. Runs inline on every read/write
    /// path — there is no background scheduler.
    ///
    /// Idempotent: a second call with the same `now` produces zero
    /// additional transitions.
    pub async fn reconcile(&self, scope: ReconcileScope) -> Result<Vec<Notification>, EngineError> {
        self.reconcile_at(scope, now_ms()).await
    }

    /// `reconcile` against an explicit clock.
    pub async fn reconcile_at(
        &self,
        scope: ReconcileScope,
        now: Ms,
    ) -> Result<Vec<Notification>, EngineError> {
        let started = std::time::Instant::now();
        let mut total = Transitions::default();

        let lot_ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        for lot_id in lot_ids {
            // The lot may have been deleted since we listed it
            let Some(lot) = self.get_lot(&lot_id) else {
                continue;
            };
            let mut guard = lot.write().await;
            if guard.deleted {
                continue;
            }
            total.absorb(self.reconcile_lot(lot_id, &mut guard, scope, now).await?);
        }

        metrics::histogram!(crate::observability::RECONCILE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(total.into_notifications())
    }

    /// Reconcile a single lot. Caller holds the lot's write lock, so the
    /// state observed after this call is current as of `now`.
    pub(super) async fn reconcile_lot(
        &self,
        lot_id: Ulid,
        lot: &mut LotState,
        scope: ReconcileScope,
        now: Ms,
    ) -> Result<Transitions, EngineError> {
        let mut out = Transitions::default();

        // Expire: ended reservations are converted to history records and
        // removed from the active set, one atomic WAL event each. The spot
        // needs no explicit freeing — status is derived.
        let ended: Vec<Ulid> = lot
            .reservations
            .iter()
            .filter(|r| scope.matches(r) && r.interval.has_ended(now))
            .map(|r| r.id)
            .collect();
        for id in ended {
            let Some(r) = lot.reservation(id) else { continue };
            let record = HistoryRecord {
                reservation_id: r.id,
                user_id: r.user_id,
                spot_id: Some(r.spot_id),
                interval: r.interval,
                cost: r.cost,
                vehicle_no: r.vehicle_no.clone(),
                cancelled: false,
                closed_at: now,
            };
            let event = Event::ReservationClosed { lot_id, record };
            self.persist_and_apply(lot_id, lot, &event).await?;
            out.expired += 1;
        }

        // Activate: a no-op for spot status (derived), but each started
        // reservation gets exactly one Activated notification. The marker
        // is persisted so the one-shot survives replay.
        let started: Vec<Ulid> = lot
            .reservations
            .iter()
            .filter(|r| {
                scope.matches(r)
                    && !r.activated
                    && r.interval.has_started(now)
                    && !r.interval.has_ended(now)
            })
            .map(|r| r.id)
            .collect();
        for id in started {
            let event = Event::ReservationActivated { id, lot_id };
            self.persist_and_apply(lot_id, lot, &event).await?;
            out.activated += 1;
        }

        if out.expired > 0 {
            metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL)
                .increment(out.expired as u64);
        }
        if out.activated > 0 {
            metrics::counter!(crate::observability::RESERVATIONS_ACTIVATED_TOTAL)
                .increment(out.activated as u64);
        }
        Ok(out)
    }
}
