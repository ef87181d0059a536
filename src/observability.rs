use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "kerb_bookings_confirmed_total";

/// Counter: bookings rejected because no spot was free for the interval.
pub const BOOKINGS_REJECTED_TOTAL: &str = "kerb_bookings_rejected_total";

/// Counter: reservations released or cancelled by their owner.
pub const RESERVATIONS_RELEASED_TOTAL: &str = "kerb_reservations_released_total";

/// Counter: reservations expired to history by reconciliation.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "kerb_reservations_expired_total";

/// Counter: reservations whose start passed (activation notifications).
pub const RESERVATIONS_ACTIVATED_TOTAL: &str = "kerb_reservations_activated_total";

/// Histogram: one reconciliation pass, in seconds.
pub const RECONCILE_DURATION_SECONDS: &str = "kerb_reconcile_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of lots.
pub const LOTS_ACTIVE: &str = "kerb_lots_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kerb_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "kerb_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install a stdout tracing subscriber honoring `RUST_LOG`. For embedders
/// that don't bring their own subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
