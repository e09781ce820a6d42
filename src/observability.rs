use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "venuebook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "venuebook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venuebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venuebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venuebook_connections_rejected_total";

/// Counter: logins whose user name does not resolve to an actor.
pub const AUTH_FAILURES_TOTAL: &str = "venuebook_auth_failures_total";

/// Histogram: journal commit (write + fsync) duration in seconds.
pub const JOURNAL_COMMIT_DURATION_SECONDS: &str = "venuebook_journal_commit_duration_seconds";

/// Histogram: events per journal commit.
pub const JOURNAL_COMMIT_BATCH_SIZE: &str = "venuebook_journal_commit_batch_size";

/// Counter: journal rewrites.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "venuebook_journal_compactions_total";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservation rows created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "venuebook_reservations_created_total";

pub const RESERVATIONS_CANCELLED_TOTAL: &str = "venuebook_reservations_cancelled_total";

pub const RESERVATIONS_RESCHEDULED_TOTAL: &str = "venuebook_reservations_rescheduled_total";

/// Counter: writes refused by the store's locked conflict re-check.
pub const WRITE_CONFLICTS_TOTAL: &str = "venuebook_write_conflicts_total";

/// Counter: notifications handed to the queue. Labels: kind.
pub const NOTIFICATIONS_ENQUEUED_TOTAL: &str = "venuebook_notifications_enqueued_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::UpsertAccount(_) => "upsert_account",
        Command::UpsertVenue { .. } => "upsert_venue",
        Command::SetVenueStatus { .. } => "set_venue_status",
        Command::UpsertTable(_) => "upsert_table",
        Command::UpsertSeat(_) => "upsert_seat",
        Command::SetHoursRow { .. } => "set_hours_row",
        Command::InsertSeatBlock(_) => "insert_seat_block",
        Command::DeleteSeatBlock { .. } => "delete_seat_block",
        Command::InsertReservations(_) => "insert_reservations",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::RescheduleReservation { .. } => "reschedule_reservation",
        Command::SelectOpenStatus { .. } => "select_open_status",
        Command::SelectBookability { .. } => "select_bookability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectLabel { .. } => "select_label",
    }
}
