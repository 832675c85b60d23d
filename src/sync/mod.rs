//! Parallel block download scheduler
//!
//! Coordinates N concurrent peer channels over a shared queue of
//! header-advertised block hashes: a reservation table hands disjoint work
//! to per-peer slots, per-channel protocols drive requests and ingestion,
//! and stalled slots steal work from the largest slot.

pub mod block_in;
pub mod hash_queue;
pub mod performance;
pub mod reservation;
pub mod reservations;
pub mod session;

pub use block_in::BlockInProtocol;
pub use hash_queue::{HashEntry, HashQueue};
pub use performance::RateSample;
pub use reservation::Reservation;
pub use reservations::{RateStatistics, Reservations};
pub use session::OutboundSession;
