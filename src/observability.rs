use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "carrel_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "carrel_query_duration_seconds";

/// Counter: booking lifecycle outcomes. Labels: outcome
/// (confirmed, cancelled, expired, or a rejection label).
pub const BOOKINGS_TOTAL: &str = "carrel_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "carrel_connections_active";
pub const CONNECTIONS_TOTAL: &str = "carrel_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "carrel_connections_rejected_total";

/// Gauge: libraries with a loaded engine.
pub const TENANTS_ACTIVE: &str = "carrel_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carrel_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "carrel_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSeats { .. } => "insert_seats",
        Command::UpdateSeatStatus { .. } => "update_seat_status",
        Command::SelectSeats { .. } => "select_seats",
        Command::InsertBooking(_) => "insert_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::DeleteBooking(_) => "delete_booking",
        Command::CheckIn { .. } => "check_in",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
