use tokio::sync::OwnedRwLockWriteGuard;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    BOOKING_REJECTIONS_TOTAL, BOOKINGS_TOTAL, CANCELLATIONS_TOTAL, FLIGHTS_SCHEDULED_TOTAL,
    SCHEDULE_CONFLICTS_TOTAL, rejection_kind,
};

use super::schedule::{check_schedule_clear, now_ms, validate_window};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct AircraftSpec {
    pub tail_number: String,
    pub model: String,
    pub seats: u32,
    pub production_year: u32,
}

#[derive(Debug, Clone)]
pub struct AircraftChange {
    pub model: String,
    pub seats: u32,
    pub production_year: u32,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct FlightSpec {
    pub number: String,
    pub departure: String,
    pub destination: String,
    pub window: Window,
    pub aircraft_id: Ulid,
}

/// Everything about a flight except its number — the number is the business
/// identity and is fixed at scheduling time.
#[derive(Debug, Clone)]
pub struct FlightChange {
    pub departure: String,
    pub destination: String,
    pub window: Window,
    pub aircraft_id: Ulid,
}

/// Result of a committed booking. `notified` reports whether any subscriber
/// received the confirmation event; delivery failure never rolls back the
/// booking.
#[derive(Debug, Clone)]
pub struct BookingReceipt {
    pub reservation: Reservation,
    pub availability: Availability,
    pub notified: bool,
}

/// Cancellation is idempotent: cancelling twice is a benign no-op, reported
/// distinctly from "reservation not found".
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled {
        availability: Availability,
        notified: bool,
    },
    AlreadyCancelled,
}

fn checked_label(raw: &str, too_long: &'static str, max: usize) -> Result<String, EngineError> {
    let label = raw.trim();
    if label.is_empty() || label.len() > max {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(label.to_string())
}

fn is_plausible_email(email: &str) -> bool {
    match email.find('@') {
        Some(at) => at > 0 && at < email.len() - 1 && !email.contains(char::is_whitespace),
        None => false,
    }
}

impl Engine {
    // ── Aircraft ─────────────────────────────────────────

    pub async fn register_aircraft(&self, spec: AircraftSpec) -> Result<Ulid, EngineError> {
        let tail = checked_label(&spec.tail_number, "tail number must be 1-20 chars", MAX_KEY_LEN)?;
        let model = checked_label(&spec.model, "model name must be 1-200 chars", MAX_NAME_LEN)?;
        if spec.seats == 0 {
            return Err(EngineError::LimitExceeded("aircraft needs at least one seat"));
        }
        if self.aircraft_count() >= MAX_AIRCRAFT {
            return Err(EngineError::LimitExceeded("too many aircraft"));
        }

        let id = Ulid::new();
        Engine::claim_key(self.tail_numbers(), tail.clone(), id)?;

        let event = Event::AircraftRegistered {
            id,
            tail_number: tail.clone(),
            model: model.clone(),
            seats: spec.seats,
            production_year: spec.production_year,
            active: true,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.tail_numbers().remove(&tail);
            return Err(e);
        }
        self.insert_aircraft(
            id,
            AircraftState::new(Aircraft {
                id,
                tail_number: tail.clone(),
                model,
                seats: spec.seats,
                production_year: spec.production_year,
                active: true,
            }),
        );
        info!("registered aircraft {tail} ({id})");
        self.notify.send(id, &event);
        Ok(id)
    }

    pub async fn update_aircraft(&self, id: Ulid, change: AircraftChange) -> Result<(), EngineError> {
        let model = checked_label(&change.model, "model name must be 1-200 chars", MAX_NAME_LEN)?;
        if change.seats == 0 {
            return Err(EngineError::LimitExceeded("aircraft needs at least one seat"));
        }
        let ast = self.aircraft_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ast.write().await;
        // The aircraft may have been retired while we waited for the lock.
        if !self.aircraft_exists(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::AircraftUpdated {
            id,
            model: model.clone(),
            seats: change.seats,
            production_year: change.production_year,
            active: change.active,
        };
        self.wal_append(&event).await?;
        guard.record.model = model;
        guard.record.seats = change.seats;
        guard.record.production_year = change.production_year;
        guard.record.active = change.active;
        drop(guard);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Rejected outright while any flight still references the aircraft —
    /// referential integrity is the coordinator's job, not a cascade's.
    pub async fn retire_aircraft(&self, id: Ulid) -> Result<(), EngineError> {
        let ast = self.aircraft_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ast.write().await;
        if !self.aircraft_exists(&id) {
            return Err(EngineError::NotFound(id));
        }
        if !guard.schedule.is_empty() {
            return Err(EngineError::HasFlights {
                count: guard.schedule.len(),
            });
        }

        let event = Event::AircraftRetired { id };
        self.wal_append(&event).await?;
        self.tail_numbers().remove(&guard.record.tail_number);
        self.remove_aircraft(&id);
        info!("retired aircraft {} ({id})", guard.record.tail_number);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Flights ──────────────────────────────────────────

    pub async fn create_flight(&self, spec: FlightSpec) -> Result<Ulid, EngineError> {
        validate_window(&spec.window)?;
        let number = checked_label(&spec.number, "flight number must be 1-20 chars", MAX_KEY_LEN)?;
        let departure =
            checked_label(&spec.departure, "departure label must be 1-200 chars", MAX_NAME_LEN)?;
        let destination = checked_label(
            &spec.destination,
            "destination label must be 1-200 chars",
            MAX_NAME_LEN,
        )?;

        let ast = self
            .aircraft_state(&spec.aircraft_id)
            .ok_or(EngineError::NotFound(spec.aircraft_id))?;
        let mut guard = ast.write().await;
        if !self.aircraft_exists(&spec.aircraft_id) {
            return Err(EngineError::NotFound(spec.aircraft_id));
        }
        if guard.schedule.len() >= MAX_FLIGHTS_PER_AIRCRAFT {
            return Err(EngineError::LimitExceeded("too many flights on aircraft"));
        }

        // Conflict check and schedule write stay under the same guard.
        if let Err(e) = check_schedule_clear(&guard, &spec.window, None) {
            metrics::counter!(SCHEDULE_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = Ulid::new();
        Engine::claim_key(self.flight_numbers(), number.clone(), id)?;

        let event = Event::FlightScheduled {
            id,
            number: number.clone(),
            departure: departure.clone(),
            destination: destination.clone(),
            window: spec.window,
            aircraft_id: spec.aircraft_id,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.flight_numbers().remove(&number);
            return Err(e);
        }
        guard.insert_entry(ScheduleEntry {
            flight_id: id,
            number: number.clone(),
            window: spec.window,
        });
        self.insert_flight(
            id,
            FlightState::new(Flight {
                id,
                number: number.clone(),
                departure,
                destination,
                window: spec.window,
                aircraft_id: spec.aircraft_id,
            }),
        );
        drop(guard);
        metrics::counter!(FLIGHTS_SCHEDULED_TOTAL).increment(1);
        info!("scheduled flight {number} ({id})");
        self.notify.send(spec.aircraft_id, &event);
        Ok(id)
    }

    /// Re-enters validation: the new window is checked against all *other*
    /// committed flights of the target aircraft before anything changes.
    pub async fn update_flight(&self, id: Ulid, change: FlightChange) -> Result<(), EngineError> {
        validate_window(&change.window)?;
        let departure =
            checked_label(&change.departure, "departure label must be 1-200 chars", MAX_NAME_LEN)?;
        let destination = checked_label(
            &change.destination,
            "destination label must be 1-200 chars",
            MAX_NAME_LEN,
        )?;

        let fst = self.flight_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut fguard = fst.write().await;
        if !self.flight_exists(&id) {
            return Err(EngineError::NotFound(id));
        }
        let old_aircraft = fguard.record.aircraft_id;
        let new_aircraft = change.aircraft_id;

        let new_ast = self
            .aircraft_state(&new_aircraft)
            .ok_or(EngineError::NotFound(new_aircraft))?;

        // Flight lock first, then aircraft locks in sorted id order.
        let mut old_guard: Option<OwnedRwLockWriteGuard<AircraftState>> = None;
        let mut new_guard;
        if old_aircraft == new_aircraft {
            new_guard = new_ast.write_owned().await;
        } else {
            let old_ast = self
                .aircraft_state(&old_aircraft)
                .ok_or(EngineError::NotFound(old_aircraft))?;
            if old_aircraft < new_aircraft {
                old_guard = Some(old_ast.write_owned().await);
                new_guard = new_ast.write_owned().await;
            } else {
                new_guard = new_ast.write_owned().await;
                old_guard = Some(old_ast.write_owned().await);
            }
            if !self.aircraft_exists(&new_aircraft) {
                return Err(EngineError::NotFound(new_aircraft));
            }
            if new_guard.schedule.len() >= MAX_FLIGHTS_PER_AIRCRAFT {
                return Err(EngineError::LimitExceeded("too many flights on aircraft"));
            }
        }

        let exclude = if old_aircraft == new_aircraft {
            Some(id)
        } else {
            None
        };
        if let Err(e) = check_schedule_clear(&new_guard, &change.window, exclude) {
            metrics::counter!(SCHEDULE_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::FlightRescheduled {
            id,
            departure: departure.clone(),
            destination: destination.clone(),
            window: change.window,
            aircraft_id: new_aircraft,
        };
        self.wal_append(&event).await?;

        let number = fguard.record.number.clone();
        match old_guard.as_mut() {
            Some(g) => {
                g.remove_entry(id);
            }
            None => {
                new_guard.remove_entry(id);
            }
        }
        new_guard.insert_entry(ScheduleEntry {
            flight_id: id,
            number: number.clone(),
            window: change.window,
        });
        fguard.record.departure = departure;
        fguard.record.destination = destination;
        fguard.record.window = change.window;
        fguard.record.aircraft_id = new_aircraft;
        info!("rescheduled flight {number} ({id})");
        self.notify.send(new_aircraft, &event);
        Ok(())
    }

    /// Rejected outright while any reservation — active or cancelled —
    /// references the flight; the manifest is an audit trail.
    pub async fn delete_flight(&self, id: Ulid) -> Result<(), EngineError> {
        let fst = self.flight_state(&id).ok_or(EngineError::NotFound(id))?;
        let fguard = fst.write().await;
        if !self.flight_exists(&id) {
            return Err(EngineError::NotFound(id));
        }
        if !fguard.manifest.is_empty() {
            return Err(EngineError::HasReservations {
                count: fguard.manifest.len(),
            });
        }
        let aircraft_id = fguard.record.aircraft_id;
        let ast = self
            .aircraft_state(&aircraft_id)
            .ok_or(EngineError::NotFound(aircraft_id))?;
        let mut aguard = ast.write().await;

        let event = Event::FlightRemoved { id };
        self.wal_append(&event).await?;
        aguard.remove_entry(id);
        self.flight_numbers().remove(&fguard.record.number);
        self.remove_flight(&id);
        info!("removed flight {} ({id})", fguard.record.number);
        drop(aguard);
        drop(fguard);
        self.notify.send(aircraft_id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────

    pub async fn create_reservation(
        &self,
        flight_id: Ulid,
        passenger_name: &str,
        passenger_email: &str,
    ) -> Result<BookingReceipt, EngineError> {
        let result = self.book(flight_id, passenger_name, passenger_email).await;
        match &result {
            Ok(receipt) => {
                metrics::counter!(BOOKINGS_TOTAL).increment(1);
                info!(
                    "reservation created: {} (flight {flight_id})",
                    receipt.reservation.code
                );
            }
            Err(e) => {
                metrics::counter!(BOOKING_REJECTIONS_TOTAL, "kind" => rejection_kind(e))
                    .increment(1);
            }
        }
        result
    }

    /// The whole read-decide-write sequence runs under the flight's write
    /// lock: departed check, uniqueness check, capacity check against the
    /// aircraft's *current* seat count, code claim, WAL append, apply. No
    /// suspension point lets a concurrent booking interleave between the
    /// capacity read and the manifest write.
    async fn book(
        &self,
        flight_id: Ulid,
        passenger_name: &str,
        passenger_email: &str,
    ) -> Result<BookingReceipt, EngineError> {
        let name = checked_label(passenger_name, "passenger name must be 1-200 chars", MAX_NAME_LEN)?;
        let email = passenger_email.trim();
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !is_plausible_email(email) {
            return Err(EngineError::LimitExceeded("malformed email"));
        }

        let fst = self
            .flight_state(&flight_id)
            .ok_or(EngineError::NotFound(flight_id))?;
        let mut guard = fst.write().await;
        if !self.flight_exists(&flight_id) {
            return Err(EngineError::NotFound(flight_id));
        }
        if guard.manifest.len() >= MAX_RESERVATIONS_PER_FLIGHT {
            return Err(EngineError::LimitExceeded("too many reservations on flight"));
        }

        let now = now_ms();
        if guard.record.window.depart <= now {
            return Err(EngineError::FlightDeparted {
                departure: guard.record.window.depart,
            });
        }
        let normalized = normalize_email(email);
        if let Some(existing) = guard.active_holder(&normalized) {
            return Err(EngineError::DuplicateBooking {
                reservation_id: existing,
            });
        }
        let capacity = self.seats_of(&guard.record.aircraft_id).await?;
        if guard.active >= capacity {
            return Err(EngineError::CapacityExceeded {
                capacity,
                active: guard.active,
            });
        }

        let id = Ulid::new();
        let code = self.claim_code(id)?;
        let reservation = Reservation {
            id,
            code,
            passenger_name: name,
            passenger_email: email.to_string(),
            flight_id,
            status: ReservationStatus::Active,
            created_at: now,
        };
        let event = Event::ReservationBooked {
            id,
            flight_id,
            code,
            passenger_name: reservation.passenger_name.clone(),
            passenger_email: reservation.passenger_email.clone(),
            created_at: now,
        };
        let notified = match self.persist_reservation_event(&mut guard, &event).await {
            Ok(n) => n,
            Err(e) => {
                // The claim only becomes permanent once committed.
                self.release_code(&code);
                return Err(e);
            }
        };
        let availability = guard.availability(capacity);
        Ok(BookingReceipt {
            reservation,
            availability,
            notified,
        })
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<CancelOutcome, EngineError> {
        let flight_id = self
            .flight_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let fst = self
            .flight_state(&flight_id)
            .ok_or(EngineError::NotFound(flight_id))?;
        let mut guard = fst.write().await;

        let code = {
            let Some(res) = guard.reservation(id) else {
                return Err(EngineError::NotFound(id));
            };
            if !res.status.is_active() {
                return Ok(CancelOutcome::AlreadyCancelled);
            }
            res.code
        };

        let event = Event::ReservationCancelled { id, flight_id };
        let notified = self.persist_reservation_event(&mut guard, &event).await?;
        let capacity = self.seats_of(&guard.record.aircraft_id).await?;
        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        info!("reservation cancelled: {code} (flight {flight_id})");
        Ok(CancelOutcome::Cancelled {
            availability: guard.availability(capacity),
            notified,
        })
    }
}
