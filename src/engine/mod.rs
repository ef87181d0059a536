mod booking;
mod conflict;
mod error;
mod queries;
mod reconcile;

pub use conflict::booking_cost;
pub use error::EngineError;
pub use reconcile::ReconcileScope;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedLotState = Arc<RwLock<LotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation engine: all lots, the history log, and the WAL writer.
pub struct Engine {
    pub lots: DashMap<Ulid, SharedLotState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (spot/reservation) id → lot id.
    pub(super) entity_to_lot: DashMap<Ulid, Ulid>,
    /// Append-only history log, partitioned by user.
    pub(super) history: DashMap<Ulid, Vec<HistoryRecord>>,
}

/// Apply an event directly to a LotState (no locking — caller holds the lock).
fn apply_to_lot(
    lot: &mut LotState,
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
    history: &DashMap<Ulid, Vec<HistoryRecord>>,
) {
    match event {
        Event::SpotAdded { lot_id, spot_id } => {
            lot.add_spot(*spot_id);
            entity_map.insert(*spot_id, *lot_id);
        }
        Event::SpotRemoved { spot_id, .. } => {
            lot.remove_spot(*spot_id);
            entity_map.remove(spot_id);
            detach_spot_history(history, &[*spot_id]);
        }
        Event::ReservationCommitted {
            id,
            lot_id,
            user_id,
            spot_id,
            interval,
            cost,
            vehicle_no,
            activated,
        } => {
            lot.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                spot_id: *spot_id,
                interval: *interval,
                cost: *cost,
                vehicle_no: vehicle_no.clone(),
                activated: *activated,
            });
            entity_map.insert(*id, *lot_id);
        }
        Event::ReservationActivated { id, .. } => {
            if let Some(r) = lot.reservation_mut(*id) {
                r.activated = true;
            }
        }
        Event::ReservationClosed { record, .. } => {
            lot.remove_reservation(record.reservation_id);
            entity_map.remove(&record.reservation_id);
            history.entry(record.user_id).or_default().push(record.clone());
        }
        Event::LotUpdated {
            city,
            pincode,
            area_type,
            price_per_hour,
            address,
            ..
        } => {
            lot.city = city.clone();
            lot.pincode = pincode.clone();
            lot.area_type = *area_type;
            lot.price_per_hour = *price_per_hour;
            lot.address = address.clone();
        }
        // Handled at the DashMap level, not per lot
        Event::LotCreated { .. } | Event::LotDeleted { .. } | Event::HistoryRecorded { .. } => {}
    }
}

/// Null the spot back-reference in history records for deleted spots.
/// The records themselves are immutable facts and are never removed.
fn detach_spot_history(history: &DashMap<Ulid, Vec<HistoryRecord>>, spot_ids: &[Ulid]) {
    if spot_ids.is_empty() {
        return;
    }
    for mut entry in history.iter_mut() {
        for record in entry.value_mut() {
            if let Some(spot) = record.spot_id
                && spot_ids.contains(&spot)
            {
                record.spot_id = None;
            }
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            lots: DashMap::new(),
            wal_tx,
            notify,
            entity_to_lot: DashMap::new(),
            history: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::LotCreated {
                    id,
                    city,
                    pincode,
                    area_type,
                    price_per_hour,
                    address,
                    spot_ids,
                } => {
                    let lot = LotState::new(
                        *id,
                        city.clone(),
                        pincode.clone(),
                        *area_type,
                        *price_per_hour,
                        address.clone(),
                        spot_ids.clone(),
                    );
                    for spot_id in spot_ids {
                        engine.entity_to_lot.insert(*spot_id, *id);
                    }
                    engine.lots.insert(*id, Arc::new(RwLock::new(lot)));
                }
                Event::LotDeleted { id } => {
                    if let Some((_, lot)) = engine.lots.remove(id) {
                        let guard = lot.try_read().expect("replay: uncontended read");
                        detach_spot_history(&engine.history, &guard.spots);
                        for spot_id in &guard.spots {
                            engine.entity_to_lot.remove(spot_id);
                        }
                    }
                }
                Event::HistoryRecorded { record } => {
                    engine
                        .history
                        .entry(record.user_id)
                        .or_default()
                        .push(record.clone());
                }
                other => {
                    if let Some(lot_id) = event_lot_id(other)
                        && let Some(entry) = engine.lots.get(&lot_id)
                    {
                        let lot_arc = entry.clone();
                        let mut guard = lot_arc.try_write().expect("replay: uncontended write");
                        apply_to_lot(&mut guard, other, &engine.entity_to_lot, &engine.history);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::LOTS_ACTIVE).set(engine.lots.len() as f64);
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_lot(&self, id: &Ulid) -> Option<SharedLotState> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    /// Which lot a spot or reservation belongs to.
    pub fn lot_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_lot.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        lot_id: Ulid,
        lot: &mut LotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_lot(lot, event, &self.entity_to_lot, &self.history);
        self.notify.send(lot_id, event);
        Ok(())
    }

    /// Get the lot and acquire its write lock. A deleting writer may have
    /// won the lock between the map lookup and the acquisition here, so
    /// the tombstone is re-checked under the lock.
    pub(super) async fn lot_write(
        &self,
        lot_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<LotState>, EngineError> {
        let lot = self.get_lot(&lot_id).ok_or(EngineError::NotFound(lot_id))?;
        let guard = lot.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(lot_id));
        }
        Ok(guard)
    }

    /// Lookup entity → lot, get lot, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<LotState>), EngineError> {
        let lot_id = self
            .lot_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.lot_write(lot_id).await?;
        Ok((lot_id, guard))
    }
}

/// Extract the lot id from an event (for per-lot events).
fn event_lot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SpotAdded { lot_id, .. }
        | Event::SpotRemoved { lot_id, .. }
        | Event::ReservationCommitted { lot_id, .. }
        | Event::ReservationActivated { lot_id, .. }
        | Event::ReservationClosed { lot_id, .. } => Some(*lot_id),
        Event::LotUpdated { id, .. } => Some(*id),
        Event::LotCreated { .. } | Event::LotDeleted { .. } | Event::HistoryRecorded { .. } => None,
    }
}
