use ulid::Ulid;

use crate::model::{Ms, Window};

/// Every rejection carries the invariant it tripped and the entity that
/// tripped it — callers need to distinguish "no" from "no, because X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    /// A tail number or flight number is already registered.
    IdentityTaken(String),
    /// Arrival not strictly after departure.
    InvalidWindow { depart: Ms, arrive: Ms },
    /// The aircraft is already committed to an overlapping (buffered) window.
    ScheduleConflict {
        flight_id: Ulid,
        number: String,
        window: Window,
    },
    CapacityExceeded { capacity: u32, active: u32 },
    /// This passenger already holds an active reservation on this flight.
    DuplicateBooking { reservation_id: Ulid },
    FlightDeparted { departure: Ms },
    /// Flight deletion blocked: reservations (any status) reference it.
    HasReservations { count: usize },
    /// Aircraft retirement blocked: flights reference it.
    HasFlights { count: usize },
    LimitExceeded(&'static str),
    /// Code allocation kept colliding. Practically unreachable; retryable.
    CodeCollision { attempts: u32 },
    WalError(String),
}

impl EngineError {
    /// Transient failures worth retrying; everything else is a firm no.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::WalError(_) | EngineError::CodeCollision { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::IdentityTaken(key) => write!(f, "identifier already in use: {key}"),
            EngineError::InvalidWindow { depart, arrive } => {
                write!(f, "arrival {arrive} is not after departure {depart}")
            }
            EngineError::ScheduleConflict {
                flight_id,
                number,
                window,
            } => {
                write!(
                    f,
                    "aircraft already scheduled for flight {number} ({flight_id}) \
                     from {} to {}; a one-hour turnaround gap is required",
                    window.depart, window.arrive
                )
            }
            EngineError::CapacityExceeded { capacity, active } => {
                write!(f, "flight fully booked: {active} of {capacity} seats taken")
            }
            EngineError::DuplicateBooking { reservation_id } => {
                write!(
                    f,
                    "an active reservation already exists for this passenger: {reservation_id}"
                )
            }
            EngineError::FlightDeparted { departure } => {
                write!(f, "flight departed at {departure}")
            }
            EngineError::HasReservations { count } => {
                write!(f, "cannot delete flight: {count} reservations reference it")
            }
            EngineError::HasFlights { count } => {
                write!(f, "cannot retire aircraft: {count} flights reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CodeCollision { attempts } => {
                write!(f, "reservation code allocation collided {attempts} times")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
