//! kerb — parking reservation lifecycle engine.
//!
//! Allocates physical parking spots to users for half-open time intervals,
//! keeps spot status derived from the reservation set, and expires ended
//! reservations into an append-only history log. State is held in memory
//! per lot and made durable through a write-ahead log.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
