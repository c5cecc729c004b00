use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Structural checks, run before any lock is taken.
pub(crate) fn validate_window(w: &Window) -> Result<(), EngineError> {
    if w.arrive <= w.depart {
        return Err(EngineError::InvalidWindow {
            depart: w.depart,
            arrive: w.arrive,
        });
    }
    if w.depart < MIN_VALID_TIMESTAMP_MS || w.arrive > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if w.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// Interval Index conflict query. The candidate is padded by the turnaround
/// buffer on both ends and compared inclusively against the raw committed
/// windows, so a gap of exactly the buffer still conflicts and one
/// millisecond more is clear. `exclude` drops the flight's own prior entry
/// when rescheduling.
///
/// Only the first conflict is reported; among several overlaps the lowest
/// flight id wins, which keeps error messages deterministic regardless of
/// insertion order. The check never commits anything — the caller holds the
/// aircraft write lock across check + write.
pub(crate) fn check_schedule_clear(
    state: &AircraftState,
    candidate: &Window,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let padded = candidate.padded(TURNAROUND_BUFFER_MS);
    let mut hit: Option<&ScheduleEntry> = None;
    for entry in state.overlapping(&padded) {
        if exclude == Some(entry.flight_id) {
            continue;
        }
        if hit.is_none_or(|h| entry.flight_id < h.flight_id) {
            hit = Some(entry);
        }
    }
    match hit {
        Some(e) => Err(EngineError::ScheduleConflict {
            flight_id: e.flight_id,
            number: e.number.clone(),
            window: e.window,
        }),
        None => Ok(()),
    }
}
