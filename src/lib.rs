//! blocktime — a race-free flight booking/scheduling engine.
//!
//! Allocates an airplane's schedule (time slices with a mandatory turnaround
//! gap) and a flight's seats (a fixed capacity ceiling) to competing
//! requests. Every check-then-write sequence runs inside the write lock of
//! the affected key — aircraft id for scheduling, flight id for seats — and
//! commits to an fsynced write-ahead log before the in-memory state changes,
//! so concurrent bookings can never overbook a flight and concurrent
//! schedule changes can never double-book an airplane.

pub mod codes;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use codes::ReservationCode;
pub use engine::{BookingReceipt, CancelOutcome, Engine, EngineError};
pub use model::{Aircraft, Availability, Event, Flight, Ms, Reservation, ReservationStatus, Window};
