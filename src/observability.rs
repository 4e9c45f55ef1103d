use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "deskbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "deskbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "deskbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "deskbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "deskbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "deskbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "deskbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: bookings created. Labels: kind.
pub const BOOKINGS_CREATED_TOTAL: &str = "deskbook_bookings_created_total";

pub const BOOKINGS_STOPPED_TOTAL: &str = "deskbook_bookings_stopped_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "deskbook_bookings_cancelled_total";

/// Counter: overlaps rejected. Labels: stage (`precheck` or `constraint`).
pub const CONFLICTS_TOTAL: &str = "deskbook_conflicts_total";

/// Counter: truncates that fell back to the latest open record.
pub const DEGRADED_TRUNCATES_TOTAL: &str = "deskbook_degraded_truncates_total";

/// Gauge: bookings waiting on a ledger repair.
pub const PENDING_REPAIRS: &str = "deskbook_pending_repairs";

pub const ALERTS_RAISED_TOTAL: &str = "deskbook_alerts_raised_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
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
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertPromoBooking { .. } => "insert_promo_booking",
        Command::StopBooking { .. } => "stop_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::PurgeBooking { .. } => "purge_booking",
        Command::InsertPayment { .. } => "insert_payment",
        Command::InsertDownPayment { .. } => "insert_down_payment",
        Command::InsertDiscount { .. } => "insert_discount",
        Command::SetPaid { .. } => "set_paid",
        Command::RegenerateCode { .. } => "regenerate_code",
        Command::Attendance { .. } => "attendance",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectBlockedTime { .. } => "select_blocked_time",
        Command::SelectOccupancy => "select_occupancy",
        Command::SelectAlerts => "select_alerts",
        Command::AckAlert { .. } => "ack_alert",
    }
}
