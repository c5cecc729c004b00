use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::codes::ReservationCode;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Closed interval `[depart, arrive]` — both endpoints are occupied instants.
/// Overlap is inclusive, so two windows that merely touch still conflict;
/// this matches the turnaround-buffer semantics where a gap of exactly the
/// buffer is not enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub depart: Ms,
    pub arrive: Ms,
}

impl Window {
    pub fn new(depart: Ms, arrive: Ms) -> Self {
        debug_assert!(depart < arrive, "Window depart must be before arrive");
        Self { depart, arrive }
    }

    pub fn duration_ms(&self) -> Ms {
        self.arrive - self.depart
    }

    /// Inclusive overlap: `[a,b]` and `[c,d]` conflict iff `a ≤ d && c ≤ b`.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.depart <= other.arrive && other.depart <= self.arrive
    }

    /// Widen both ends by `pad`. Used to apply the turnaround buffer to a
    /// candidate window at check time; padded windows are never stored.
    pub fn padded(&self, pad: Ms) -> Window {
        Window {
            depart: self.depart - pad,
            arrive: self.arrive + pad,
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: Ulid,
    /// Registration number (e.g. TC-NRT). Unique, immutable business key.
    pub tail_number: String,
    pub model: String,
    /// Seat capacity. Always ≥ 1.
    pub seats: u32,
    pub production_year: u32,
    /// Operational flag. Carried as data; scheduling never gates on it.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub id: Ulid,
    /// Flight number (e.g. TK123). Unique, fixed once scheduled.
    pub number: String,
    pub departure: String,
    pub destination: String,
    pub window: Window,
    /// Non-owning reference; the aircraft outlives the flight.
    pub aircraft_id: Ulid,
}

/// One-way status: `Active → Cancelled`, no resurrection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    /// Total transition function for cancellation — cancelling an already
    /// cancelled reservation stays cancelled.
    pub fn after_cancel(self) -> Self {
        ReservationStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Passenger-facing code. Assigned at booking, immutable, reserved
    /// forever — even after cancellation.
    pub code: ReservationCode,
    pub passenger_name: String,
    /// Stored as given (trimmed). Uniqueness compares the normalized form.
    pub passenger_email: String,
    pub flight_id: Ulid,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

/// Trim + ASCII-lowercase. The duplicate-booking guard always compares this
/// form, so `Alice@X.com ` and `alice@x.com` are the same passenger.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

// ── Per-key state ────────────────────────────────────────────────

/// One committed flight window on an aircraft's schedule. The flight number
/// is denormalized in so a conflict error can name the conflicting flight
/// without taking a second lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub flight_id: Ulid,
    pub number: String,
    pub window: Window,
}

/// An aircraft plus its committed schedule. Guarded by one write lock; the
/// conflict check and the schedule write always happen under the same guard.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub record: Aircraft,
    /// Committed windows, sorted by `window.depart`.
    pub schedule: Vec<ScheduleEntry>,
}

impl AircraftState {
    pub fn new(record: Aircraft) -> Self {
        Self {
            record,
            schedule: Vec::new(),
        }
    }

    /// Insert an entry maintaining sort order by departure.
    pub fn insert_entry(&mut self, entry: ScheduleEntry) {
        let pos = self
            .schedule
            .binary_search_by_key(&entry.window.depart, |e| e.window.depart)
            .unwrap_or_else(|e| e);
        self.schedule.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, flight_id: Ulid) -> Option<ScheduleEntry> {
        if let Some(pos) = self.schedule.iter().position(|e| e.flight_id == flight_id) {
            Some(self.schedule.remove(pos))
        } else {
            None
        }
    }

    /// Entries whose window overlaps `query` (closed intervals, inclusive).
    /// Binary search skips everything departing after `query.arrive`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &ScheduleEntry> {
        let right = self
            .schedule
            .partition_point(|e| e.window.depart <= query.arrive);
        self.schedule[..right]
            .iter()
            .filter(move |e| e.window.arrive >= query.depart)
    }
}

/// A flight plus its manifest — the capacity ledger and uniqueness guard
/// live here, guarded by the flight's write lock.
#[derive(Debug, Clone)]
pub struct FlightState {
    pub record: Flight,
    /// Every reservation ever taken, in booking order. Cancellation flips
    /// status in place; nothing is removed (audit trail).
    pub manifest: Vec<Reservation>,
    /// Count of manifest entries still active.
    pub active: u32,
    /// Normalized email → holding reservation id, active reservations only.
    pub active_emails: HashMap<String, Ulid>,
}

impl FlightState {
    pub fn new(record: Flight) -> Self {
        Self {
            record,
            manifest: Vec::new(),
            active: 0,
            active_emails: HashMap::new(),
        }
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.manifest.iter().find(|r| r.id == id)
    }

    /// Active reservation held by this normalized email, if any.
    pub fn active_holder(&self, normalized_email: &str) -> Option<Ulid> {
        self.active_emails.get(normalized_email).copied()
    }

    /// Derived seat snapshot against the aircraft's current capacity.
    /// `available` saturates at zero: capacity may have been lowered below
    /// the active count after the fact.
    pub fn availability(&self, capacity: u32) -> Availability {
        Availability {
            flight_id: self.record.id,
            capacity,
            active: self.active,
            available: capacity.saturating_sub(self.active),
            fully_booked: self.active >= capacity,
        }
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AircraftRegistered {
        id: Ulid,
        tail_number: String,
        model: String,
        seats: u32,
        production_year: u32,
        active: bool,
    },
    AircraftUpdated {
        id: Ulid,
        model: String,
        seats: u32,
        production_year: u32,
        active: bool,
    },
    AircraftRetired {
        id: Ulid,
    },
    FlightScheduled {
        id: Ulid,
        number: String,
        departure: String,
        destination: String,
        window: Window,
        aircraft_id: Ulid,
    },
    FlightRescheduled {
        id: Ulid,
        departure: String,
        destination: String,
        window: Window,
        aircraft_id: Ulid,
    },
    FlightRemoved {
        id: Ulid,
    },
    ReservationBooked {
        id: Ulid,
        flight_id: Ulid,
        code: ReservationCode,
        passenger_name: String,
        passenger_email: String,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        flight_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Seat snapshot for one flight. Outside a critical section this is a
/// stale-tolerant read; only the commit path is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub flight_id: Ulid,
    pub capacity: u32,
    pub active: u32,
    pub available: u32,
    pub fully_booked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn aircraft() -> Aircraft {
        Aircraft {
            id: Ulid::new(),
            tail_number: "TC-NRT".into(),
            model: "A320".into(),
            seats: 180,
            production_year: 2018,
            active: true,
        }
    }

    fn entry(depart: Ms, arrive: Ms) -> ScheduleEntry {
        ScheduleEntry {
            flight_id: Ulid::new(),
            number: "TK1".into(),
            window: Window::new(depart, arrive),
        }
    }

    #[test]
    fn window_basics() {
        let w = Window::new(10 * H, 12 * H);
        assert_eq!(w.duration_ms(), 2 * H);
        let p = w.padded(H);
        assert_eq!(p.depart, 9 * H);
        assert_eq!(p.arrive, 13 * H);
    }

    #[test]
    fn window_overlap_is_inclusive() {
        let a = Window::new(100, 200);
        assert!(a.overlaps(&Window::new(150, 250)));
        assert!(a.overlaps(&Window::new(200, 300))); // touching counts
        assert!(a.overlaps(&Window::new(0, 100))); // touching counts
        assert!(!a.overlaps(&Window::new(201, 300)));
        assert!(!a.overlaps(&Window::new(0, 99)));
    }

    #[test]
    fn schedule_stays_sorted() {
        let mut st = AircraftState::new(aircraft());
        st.insert_entry(entry(3 * H, 4 * H));
        st.insert_entry(entry(0, H));
        st.insert_entry(entry(H, 2 * H));
        let starts: Vec<Ms> = st.schedule.iter().map(|e| e.window.depart).collect();
        assert_eq!(starts, vec![0, H, 3 * H]);
    }

    #[test]
    fn schedule_remove() {
        let mut st = AircraftState::new(aircraft());
        let e = entry(0, H);
        let id = e.flight_id;
        st.insert_entry(e);
        st.insert_entry(entry(2 * H, 3 * H));
        assert!(st.remove_entry(id).is_some());
        assert!(st.remove_entry(id).is_none());
        assert_eq!(st.schedule.len(), 1);
    }

    #[test]
    fn overlapping_prunes_by_start() {
        let mut st = AircraftState::new(aircraft());
        st.insert_entry(entry(0, H)); // past
        st.insert_entry(entry(5 * H, 6 * H)); // hit
        st.insert_entry(entry(20 * H, 21 * H)); // departs after query
        let hits: Vec<_> = st.overlapping(&Window::new(4 * H, 10 * H)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].window, Window::new(5 * H, 6 * H));
    }

    #[test]
    fn overlapping_touching_included() {
        let mut st = AircraftState::new(aircraft());
        st.insert_entry(entry(0, 4 * H));
        // Query starting exactly at the entry's arrival still hits (closed
        // intervals).
        let hits: Vec<_> = st.overlapping(&Window::new(4 * H, 5 * H)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_empty_schedule() {
        let st = AircraftState::new(aircraft());
        assert_eq!(st.overlapping(&Window::new(0, H)).count(), 0);
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("bob@x.io"), "bob@x.io");
    }

    #[test]
    fn status_transition_is_one_way() {
        assert!(ReservationStatus::Active.is_active());
        assert!(!ReservationStatus::Cancelled.is_active());
        assert_eq!(
            ReservationStatus::Active.after_cancel(),
            ReservationStatus::Cancelled
        );
        assert_eq!(
            ReservationStatus::Cancelled.after_cancel(),
            ReservationStatus::Cancelled
        );
    }

    #[test]
    fn availability_saturates() {
        let mut fs = FlightState::new(Flight {
            id: Ulid::new(),
            number: "TK9".into(),
            departure: "IST".into(),
            destination: "LHR".into(),
            window: Window::new(10 * H, 12 * H),
            aircraft_id: Ulid::new(),
        });
        fs.active = 3;
        let snap = fs.availability(2);
        assert_eq!(snap.available, 0);
        assert!(snap.fully_booked);
        let snap = fs.availability(5);
        assert_eq!(snap.available, 2);
        assert!(!snap.fully_booked);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::FlightScheduled {
            id: Ulid::new(),
            number: "TK123".into(),
            departure: "IST".into(),
            destination: "AMS".into(),
            window: Window::new(10 * H, 13 * H),
            aircraft_id: Ulid::new(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
