//! End-to-end booking lifecycle through the public API: provision lots,
//! preview and confirm bookings, watch lot events, reconcile, release,
//! compact, and come back up from the WAL.

use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use kerb::engine::{Engine, EngineError, ReconcileScope};
use kerb::model::{AreaType, Event, Interval, Ms, NotificationKind, SpotStatus};
use kerb::notify::NotifyHub;

const H: Ms = 3_600_000;
const T: Ms = 1_700_000_000_000;
const PRICE: i64 = 3_000; // 30.00/hr

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("kerb_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn full_booking_lifecycle() {
    let path = test_wal_path("lifecycle.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path.clone(), notify.clone()).unwrap();

    // Two lots in different areas
    let city_lot = Ulid::new();
    engine
        .create_lot(
            city_lot,
            "Mysore".into(),
            "570001".into(),
            AreaType::City,
            PRICE,
            "1 Palace Rd".into(),
            2,
        )
        .await
        .unwrap();
    let hill_lot = Ulid::new();
    engine
        .create_lot(
            hill_lot,
            "Chamundi".into(),
            "570010".into(),
            AreaType::TouristPlace,
            2 * PRICE,
            "Hill Rd".into(),
            1,
        )
        .await
        .unwrap();
    assert_eq!(engine.list_lots().await.len(), 2);

    // A display subscribed to the city lot sees the booking land
    let mut events = notify.subscribe(city_lot);

    let alice = Ulid::new();
    let window = Interval::new(T + H, T + 3 * H);

    let preview = engine.preview_booking_at(city_lot, window, T).await.unwrap();
    assert!(preview.available);
    assert_eq!(preview.estimated_cost, 2 * PRICE);

    let booking = engine
        .confirm_booking_at(alice, city_lot, window, "KA09EQ1234".into(), T)
        .await
        .unwrap();
    assert_eq!(booking.cost, preview.estimated_cost);

    match events.recv().await.unwrap() {
        Event::ReservationCommitted { id, .. } => assert_eq!(id, booking.id),
        other => panic!("unexpected event: {other:?}"),
    }

    // Mid-interval the booked spot shows occupied
    let mid = T + 2 * H;
    let notifications = engine.reconcile_at(ReconcileScope::All, mid).await.unwrap();
    assert!(
        notifications
            .iter()
            .any(|n| n.kind == NotificationKind::Activated && n.count == 1)
    );
    let snapshot = engine.spot_status_snapshot_at(city_lot, mid).await.unwrap();
    assert_eq!(
        snapshot.iter().filter(|s| s.status == SpotStatus::Occupied).count(),
        1
    );

    // Alice leaves early
    let record = engine.release_booking_at(booking.id, alice, mid).await.unwrap();
    assert!(!record.cancelled);
    assert!(
        engine
            .list_active_reservations_at(alice, mid)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(engine.list_history(alice, 10).len(), 1);

    // Compact and restart: both lots, the empty active set, and the
    // history record all come back
    engine.compact_wal().await.unwrap();
    drop(engine);

    let rebuilt = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(rebuilt.list_lots().await.len(), 2);
    assert!(
        rebuilt
            .list_active_reservations_at(alice, mid)
            .await
            .unwrap()
            .is_empty()
    );
    let history = rebuilt.list_history(alice, 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reservation_id, booking.id);
}

#[tokio::test]
async fn rejected_booking_reports_conflicts() {
    let path = test_wal_path("conflicts.wal");
    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();

    let lot_id = Ulid::new();
    engine
        .create_lot(
            lot_id,
            "Mysore".into(),
            "570001".into(),
            AreaType::Both,
            PRICE,
            "2 Market St".into(),
            1,
        )
        .await
        .unwrap();

    let window = Interval::new(T + H, T + 3 * H);
    engine
        .confirm_booking_at(Ulid::new(), lot_id, window, "KA09A1".into(), T)
        .await
        .unwrap();

    let overlapping = Interval::new(T + 2 * H, T + 4 * H);
    let result = engine
        .confirm_booking_at(Ulid::new(), lot_id, overlapping, "KA09A2".into(), T)
        .await;
    assert!(matches!(result, Err(EngineError::SpotNoLongerAvailable(id)) if id == lot_id));

    // The preview shows the caller what it collided with
    let preview = engine.preview_booking_at(lot_id, overlapping, T).await.unwrap();
    assert!(!preview.available);
    assert_eq!(preview.conflicts.len(), 1);
    assert_eq!(preview.conflicts[0].interval, window);

    // The retry guidance is encoded on the error itself
    let err = EngineError::SpotNoLongerAvailable(lot_id);
    assert!(err.is_retryable());
}
