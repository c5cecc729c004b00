use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed.
pub const BOOKINGS_TOTAL: &str = "blocktime_bookings_total";

/// Counter: booking attempts rejected. Labels: kind.
pub const BOOKING_REJECTIONS_TOTAL: &str = "blocktime_booking_rejections_total";

/// Counter: reservations cancelled.
pub const CANCELLATIONS_TOTAL: &str = "blocktime_cancellations_total";

/// Counter: flights committed to a schedule.
pub const FLIGHTS_SCHEDULED_TOTAL: &str = "blocktime_flights_scheduled_total";

/// Counter: schedule commits rejected for a turnaround conflict.
pub const SCHEDULE_CONFLICTS_TOTAL: &str = "blocktime_schedule_conflicts_total";

/// Counter: reservation-code collisions that forced a regeneration.
pub const CODE_RETRIES_TOTAL: &str = "blocktime_code_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "blocktime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "blocktime_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a rejection to a short label for metrics.
pub fn rejection_kind(err: &EngineError) -> &'static str {
    match err {
        EngineError::NotFound(_) => "not_found",
        EngineError::IdentityTaken(_) => "identity_taken",
        EngineError::InvalidWindow { .. } => "invalid_window",
        EngineError::ScheduleConflict { .. } => "schedule_conflict",
        EngineError::CapacityExceeded { .. } => "capacity_exceeded",
        EngineError::DuplicateBooking { .. } => "duplicate_booking",
        EngineError::FlightDeparted { .. } => "flight_departed",
        EngineError::HasReservations { .. } => "has_reservations",
        EngineError::HasFlights { .. } => "has_flights",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::CodeCollision { .. } => "code_collision",
        EngineError::WalError(_) => "wal_error",
    }
}
