use ulid::Ulid;

use crate::codes::ReservationCode;
use crate::model::*;

use super::{Engine, EngineError, SharedFlightState};

/// Snapshot reads. Everything here is stale-tolerant: a snapshot may be out
/// of date by the time the caller acts on it — only the commit paths in
/// `mutations` are authoritative.
impl Engine {
    /// Current seat count of an aircraft. Callers holding a flight write
    /// lock may call this (flight-before-aircraft lock order).
    pub(super) async fn seats_of(&self, aircraft_id: &Ulid) -> Result<u32, EngineError> {
        let ast = self
            .aircraft_state(aircraft_id)
            .ok_or(EngineError::NotFound(*aircraft_id))?;
        let guard = ast.read().await;
        Ok(guard.record.seats)
    }

    pub async fn get_availability(&self, flight_id: Ulid) -> Result<Availability, EngineError> {
        let fst = self
            .flight_state(&flight_id)
            .ok_or(EngineError::NotFound(flight_id))?;
        let guard = fst.read().await;
        let capacity = self.seats_of(&guard.record.aircraft_id).await?;
        Ok(guard.availability(capacity))
    }

    pub async fn get_aircraft(&self, id: Ulid) -> Option<Aircraft> {
        let ast = self.aircraft_state(&id)?;
        let guard = ast.read().await;
        Some(guard.record.clone())
    }

    pub async fn get_flight(&self, id: Ulid) -> Option<Flight> {
        let fst = self.flight_state(&id)?;
        let guard = fst.read().await;
        Some(guard.record.clone())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let flight_id = self.flight_for_reservation(&id)?;
        let fst = self.flight_state(&flight_id)?;
        let guard = fst.read().await;
        guard.reservation(id).cloned()
    }

    /// Resolve a passenger-facing code. Cancelled reservations resolve too —
    /// their codes stay claimed forever.
    pub async fn find_by_code(&self, code: &ReservationCode) -> Option<Reservation> {
        let id = self.reservation_for_code(code)?;
        self.get_reservation(id).await
    }

    pub async fn list_aircraft(&self) -> Vec<Aircraft> {
        let states: Vec<_> = self
            .aircraft_arena()
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut out = Vec::with_capacity(states.len());
        for st in states {
            out.push(st.read().await.record.clone());
        }
        out.sort_by_key(|a| a.id);
        out
    }

    /// All flights, ordered by departure time.
    pub async fn list_flights(&self) -> Vec<Flight> {
        let states: Vec<SharedFlightState> = self
            .flight_arena()
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut out = Vec::with_capacity(states.len());
        for st in states {
            out.push(st.read().await.record.clone());
        }
        out.sort_by_key(|f| (f.window.depart, f.id));
        out
    }

    /// The committed schedule of one aircraft, ordered by departure time.
    pub async fn flights_for_aircraft(
        &self,
        aircraft_id: Ulid,
    ) -> Result<Vec<Flight>, EngineError> {
        let ast = self
            .aircraft_state(&aircraft_id)
            .ok_or(EngineError::NotFound(aircraft_id))?;
        let flight_ids: Vec<Ulid> = {
            let guard = ast.read().await;
            guard.schedule.iter().map(|e| e.flight_id).collect()
        };
        let mut out = Vec::with_capacity(flight_ids.len());
        for id in flight_ids {
            if let Some(flight) = self.get_flight(id).await {
                out.push(flight);
            }
        }
        Ok(out)
    }

    /// The manifest of one flight in booking order, optionally filtered by
    /// status.
    pub async fn reservations_for_flight(
        &self,
        flight_id: Ulid,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let fst = self
            .flight_state(&flight_id)
            .ok_or(EngineError::NotFound(flight_id))?;
        let guard = fst.read().await;
        Ok(guard
            .manifest
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }
}
