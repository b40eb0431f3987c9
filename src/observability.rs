use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: reservations committed, single and series occurrences alike.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: booking attempts rejected for overlapping an existing reservation.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "roombook_reservation_conflicts_total";

/// Counter: recurring series committed.
pub const SERIES_CREATED_TOTAL: &str = "roombook_series_created_total";

/// Counter: reservations moved to completed by the sweeper.
pub const COMPLETIONS_SWEPT_TOTAL: &str = "roombook_completions_swept_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::InsertUser { .. } => "insert_user",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertSeries { .. } => "insert_series",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::DeleteSeries { .. } => "delete_series",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectUsers => "select_users",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectSeries { .. } => "select_series",
    }
}
