mod error;
mod mutations;
mod queries;
mod schedule;

pub use error::EngineError;
pub use mutations::{
    AircraftChange, AircraftSpec, BookingReceipt, CancelOutcome, FlightChange, FlightSpec,
};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::codes::ReservationCode;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedAircraftState = Arc<RwLock<AircraftState>>;
pub type SharedFlightState = Arc<RwLock<FlightState>>;

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
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
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

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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

// ── The engine ───────────────────────────────────────────

/// The booking/scheduling invariant engine. Entity state lives in per-key
/// `Arc<RwLock<…>>` values; every check-then-write sequence runs under the
/// affected key's write lock and appends to the WAL before the in-memory
/// state changes, all inside the same critical section.
///
/// Lock order, crate-wide: flight lock before aircraft lock; two aircraft
/// locks in sorted id order. Never the reverse.
pub struct Engine {
    /// Fleet arena: aircraft id → record + committed schedule.
    aircraft: DashMap<Ulid, SharedAircraftState>,
    /// Flight arena: flight id → record + manifest.
    flights: DashMap<Ulid, SharedFlightState>,
    /// Business-key indexes. Claimed atomically via entry insertion.
    tail_numbers: DashMap<String, Ulid>,
    flight_numbers: DashMap<String, Ulid>,
    /// Reservation id → flight id reverse lookup.
    reservation_index: DashMap<Ulid, Ulid>,
    /// Global code authority: every code ever issued, cancelled included.
    /// Codes are claimed here before commit and never released (a failed
    /// commit is the only exception).
    codes: DashMap<ReservationCode, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a reservation event to a FlightState (no locking — caller holds the
/// write lock). Also maintains the reservation index and the code authority,
/// which makes WAL replay rebuild both for free.
fn apply_to_flight(
    fs: &mut FlightState,
    event: &Event,
    index: &DashMap<Ulid, Ulid>,
    codes: &DashMap<ReservationCode, Ulid>,
) {
    match event {
        Event::ReservationBooked {
            id,
            flight_id,
            code,
            passenger_name,
            passenger_email,
            created_at,
        } => {
            fs.manifest.push(Reservation {
                id: *id,
                code: *code,
                passenger_name: passenger_name.clone(),
                passenger_email: passenger_email.clone(),
                flight_id: *flight_id,
                status: ReservationStatus::Active,
                created_at: *created_at,
            });
            fs.active += 1;
            fs.active_emails.insert(normalize_email(passenger_email), *id);
            index.insert(*id, *flight_id);
            codes.insert(*code, *id);
        }
        Event::ReservationCancelled { id, .. } => {
            let Some(pos) = fs.manifest.iter().position(|r| r.id == *id) else {
                return;
            };
            if !fs.manifest[pos].status.is_active() {
                return;
            }
            fs.manifest[pos].status = fs.manifest[pos].status.after_cancel();
            fs.active -= 1;
            let key = normalize_email(&fs.manifest[pos].passenger_email);
            fs.active_emails.remove(&key);
            // The code stays claimed and the reservation stays in the
            // manifest — cancellation is a status flip, not a delete.
        }
        _ => {}
    }
}

impl Engine {
    /// Open the engine over the WAL at `wal_path`, replaying it into memory.
    /// Must be called from within a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            aircraft: DashMap::new(),
            flights: DashMap::new(),
            tail_numbers: DashMap::new(),
            flight_numbers: DashMap::new(),
            reservation_index: DashMap::new(),
            codes: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay — we're the sole owner of every Arc here, so try_read/
        // try_write always succeed instantly. Never use blocking_read/
        // blocking_write here because this may run inside an async context.
        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    fn replay_apply(&self, event: &Event) {
        match event {
            Event::AircraftRegistered {
                id,
                tail_number,
                model,
                seats,
                production_year,
                active,
            } => {
                let record = Aircraft {
                    id: *id,
                    tail_number: tail_number.clone(),
                    model: model.clone(),
                    seats: *seats,
                    production_year: *production_year,
                    active: *active,
                };
                self.tail_numbers.insert(tail_number.clone(), *id);
                self.aircraft
                    .insert(*id, Arc::new(RwLock::new(AircraftState::new(record))));
            }
            Event::AircraftUpdated {
                id,
                model,
                seats,
                production_year,
                active,
            } => {
                if let Some(st) = self.aircraft_state(id) {
                    let mut guard = st.try_write().expect("replay: uncontended write");
                    guard.record.model = model.clone();
                    guard.record.seats = *seats;
                    guard.record.production_year = *production_year;
                    guard.record.active = *active;
                }
            }
            Event::AircraftRetired { id } => {
                if let Some((_, st)) = self.aircraft.remove(id) {
                    let guard = st.try_read().expect("replay: uncontended read");
                    self.tail_numbers.remove(&guard.record.tail_number);
                }
            }
            Event::FlightScheduled {
                id,
                number,
                departure,
                destination,
                window,
                aircraft_id,
            } => {
                let record = Flight {
                    id: *id,
                    number: number.clone(),
                    departure: departure.clone(),
                    destination: destination.clone(),
                    window: *window,
                    aircraft_id: *aircraft_id,
                };
                self.flight_numbers.insert(number.clone(), *id);
                self.flights
                    .insert(*id, Arc::new(RwLock::new(FlightState::new(record))));
                if let Some(st) = self.aircraft_state(aircraft_id) {
                    let mut guard = st.try_write().expect("replay: uncontended write");
                    guard.insert_entry(ScheduleEntry {
                        flight_id: *id,
                        number: number.clone(),
                        window: *window,
                    });
                }
            }
            Event::FlightRescheduled {
                id,
                departure,
                destination,
                window,
                aircraft_id,
            } => {
                let Some(st) = self.flight_state(id) else {
                    return;
                };
                let mut guard = st.try_write().expect("replay: uncontended write");
                let old_aircraft = guard.record.aircraft_id;
                let number = guard.record.number.clone();
                guard.record.departure = departure.clone();
                guard.record.destination = destination.clone();
                guard.record.window = *window;
                guard.record.aircraft_id = *aircraft_id;
                drop(guard);
                if let Some(st) = self.aircraft_state(&old_aircraft) {
                    st.try_write()
                        .expect("replay: uncontended write")
                        .remove_entry(*id);
                }
                if let Some(st) = self.aircraft_state(aircraft_id) {
                    st.try_write()
                        .expect("replay: uncontended write")
                        .insert_entry(ScheduleEntry {
                            flight_id: *id,
                            number,
                            window: *window,
                        });
                }
            }
            Event::FlightRemoved { id } => {
                if let Some((_, st)) = self.flights.remove(id) {
                    let guard = st.try_read().expect("replay: uncontended read");
                    self.flight_numbers.remove(&guard.record.number);
                    if let Some(ast) = self.aircraft_state(&guard.record.aircraft_id) {
                        ast.try_write()
                            .expect("replay: uncontended write")
                            .remove_entry(*id);
                    }
                }
            }
            Event::ReservationBooked { flight_id, .. }
            | Event::ReservationCancelled { flight_id, .. } => {
                if let Some(st) = self.flight_state(flight_id) {
                    let mut guard = st.try_write().expect("replay: uncontended write");
                    apply_to_flight(&mut guard, event, &self.reservation_index, &self.codes);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub(super) fn aircraft_state(&self, id: &Ulid) -> Option<SharedAircraftState> {
        self.aircraft.get(id).map(|e| e.value().clone())
    }

    pub(super) fn flight_state(&self, id: &Ulid) -> Option<SharedFlightState> {
        self.flights.get(id).map(|e| e.value().clone())
    }

    pub(super) fn aircraft_count(&self) -> usize {
        self.aircraft.len()
    }

    pub(super) fn aircraft_exists(&self, id: &Ulid) -> bool {
        self.aircraft.contains_key(id)
    }

    pub(super) fn flight_exists(&self, id: &Ulid) -> bool {
        self.flights.contains_key(id)
    }

    pub(super) fn flight_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    pub(super) fn reservation_for_code(&self, code: &ReservationCode) -> Option<Ulid> {
        self.codes.get(code).map(|e| *e.value())
    }

    /// Atomically claim a fresh code in the global authority. A collision
    /// leaves the existing claim untouched and retries with a new draw,
    /// bounded by `MAX_CODE_ATTEMPTS`.
    pub(super) fn claim_code(&self, reservation_id: Ulid) -> Result<ReservationCode, EngineError> {
        use dashmap::mapref::entry::Entry;
        for _ in 0..crate::limits::MAX_CODE_ATTEMPTS {
            let code = ReservationCode::generate();
            match self.codes.entry(code) {
                Entry::Occupied(_) => {
                    metrics::counter!(crate::observability::CODE_RETRIES_TOTAL).increment(1);
                }
                Entry::Vacant(slot) => {
                    slot.insert(reservation_id);
                    return Ok(code);
                }
            }
        }
        Err(EngineError::CodeCollision {
            attempts: crate::limits::MAX_CODE_ATTEMPTS,
        })
    }

    /// Release a claimed code. Only valid for a claim whose commit failed —
    /// committed codes are reserved forever.
    pub(super) fn release_code(&self, code: &ReservationCode) {
        self.codes.remove(code);
    }

    /// Claim a business key (tail number / flight number) atomically.
    pub(super) fn claim_key(
        index: &DashMap<String, Ulid>,
        key: String,
        id: Ulid,
    ) -> Result<(), EngineError> {
        use dashmap::mapref::entry::Entry;
        match index.entry(key) {
            Entry::Occupied(e) => Err(EngineError::IdentityTaken(e.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    pub(super) fn tail_numbers(&self) -> &DashMap<String, Ulid> {
        &self.tail_numbers
    }

    pub(super) fn flight_numbers(&self) -> &DashMap<String, Ulid> {
        &self.flight_numbers
    }

    pub(super) fn aircraft_arena(&self) -> &DashMap<Ulid, SharedAircraftState> {
        &self.aircraft
    }

    pub(super) fn flight_arena(&self) -> &DashMap<Ulid, SharedFlightState> {
        &self.flights
    }

    pub(super) fn insert_aircraft(&self, id: Ulid, state: AircraftState) {
        self.aircraft.insert(id, Arc::new(RwLock::new(state)));
    }

    pub(super) fn insert_flight(&self, id: Ulid, state: FlightState) {
        self.flights.insert(id, Arc::new(RwLock::new(state)));
    }

    pub(super) fn remove_aircraft(&self, id: &Ulid) {
        self.aircraft.remove(id);
    }

    pub(super) fn remove_flight(&self, id: &Ulid) {
        self.flights.remove(id);
    }

    /// WAL-append + apply + notify for a reservation event, under the
    /// flight's write lock. Returns whether any subscriber saw the event.
    pub(super) async fn persist_reservation_event(
        &self,
        fs: &mut FlightState,
        event: &Event,
    ) -> Result<bool, EngineError> {
        self.wal_append(event).await?;
        apply_to_flight(fs, event, &self.reservation_index, &self.codes);
        Ok(self.notify.send(fs.record.id, event))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Long-running engines should call this
    /// periodically (gate on `wal_appends_since_compact`).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Aircraft first, then each aircraft's flights, then each flight's
        // manifest — replay order must respect references.
        let aircraft: Vec<SharedAircraftState> =
            self.aircraft.iter().map(|e| e.value().clone()).collect();
        for st in aircraft {
            let guard = st.read().await;
            let a = &guard.record;
            events.push(Event::AircraftRegistered {
                id: a.id,
                tail_number: a.tail_number.clone(),
                model: a.model.clone(),
                seats: a.seats,
                production_year: a.production_year,
                active: a.active,
            });
            let flight_ids: Vec<Ulid> = guard.schedule.iter().map(|e| e.flight_id).collect();
            drop(guard);

            for fid in flight_ids {
                let Some(fst) = self.flight_state(&fid) else {
                    continue;
                };
                let fguard = fst.read().await;
                let f = &fguard.record;
                events.push(Event::FlightScheduled {
                    id: f.id,
                    number: f.number.clone(),
                    departure: f.departure.clone(),
                    destination: f.destination.clone(),
                    window: f.window,
                    aircraft_id: f.aircraft_id,
                });
                for r in &fguard.manifest {
                    events.push(Event::ReservationBooked {
                        id: r.id,
                        flight_id: r.flight_id,
                        code: r.code,
                        passenger_name: r.passenger_name.clone(),
                        passenger_email: r.passenger_email.clone(),
                        created_at: r.created_at,
                    });
                    if !r.status.is_active() {
                        events.push(Event::ReservationCancelled {
                            id: r.id,
                            flight_id: r.flight_id,
                        });
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
