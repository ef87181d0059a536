use ulid::Ulid;

use crate::limits::MAX_HISTORY_LIMIT;
use crate::model::*;

use super::conflict::now_ms;
use super::reconcile::ReconcileScope;
use super::{Engine, EngineError, SharedLotState};

impl Engine {
    pub async fn list_lots(&self) -> Vec<LotInfo> {
        let lots: Vec<SharedLotState> = self.lots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(lots.len());
        for lot in lots {
            let guard = lot.read().await;
            if guard.deleted {
                continue;
            }
            out.push(LotInfo {
                id: guard.id,
                city: guard.city.clone(),
                pincode: guard.pincode.clone(),
                area_type: guard.area_type,
                price_per_hour: guard.price_per_hour,
                address: guard.address.clone(),
                spot_count: guard.spots.len(),
            });
        }
        out
    }

    pub async fn spot_status_snapshot(
        &self,
        lot_id: Ulid,
    ) -> Result<Vec<SpotSnapshot>, EngineError> {
        self.spot_status_snapshot_at(lot_id, now_ms()).await
    }

    /// Per-spot derived status for display, always post-reconciliation.
    pub async fn spot_status_snapshot_at(
        &self,
        lot_id: Ulid,
        now: Ms,
    ) -> Result<Vec<SpotSnapshot>, EngineError> {
        let mut guard = self.lot_write(lot_id).await?;
        self.reconcile_lot(lot_id, &mut guard, ReconcileScope::All, now)
            .await?;

        Ok(guard
            .spots
            .iter()
            .map(|&spot_id| SpotSnapshot {
                spot_id,
                status: guard.spot_status(spot_id, now),
            })
            .collect())
    }

    pub async fn list_active_reservations(
        &self,
        user_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list_active_reservations_at(user_id, now_ms()).await
    }

    /// A user's active (committed, not yet expired) reservations across all
    /// lots, ordered by start time. The user's ended reservations are
    /// expired to history on the way.
    pub async fn list_active_reservations_at(
        &self,
        user_id: Ulid,
        now: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        let lot_ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        for lot_id in lot_ids {
            let Some(lot) = self.get_lot(&lot_id) else {
                continue;
            };
            let mut guard = lot.write().await;
            if guard.deleted {
                continue;
            }
            self.reconcile_lot(lot_id, &mut guard, ReconcileScope::ForUser(user_id), now)
                .await?;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.interval.start, r.id));
        Ok(out)
    }

    /// A user's history, newest first, capped at `limit` records.
    /// History is append-only; no reconciliation is needed to read it.
    pub fn list_history(&self, user_id: Ulid, limit: usize) -> Vec<HistoryRecord> {
        let limit = limit.min(MAX_HISTORY_LIMIT);
        match self.history.get(&user_id) {
            Some(records) => records.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }
}
