use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability checks per room. Labels: result (available, unavailable, error).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "lodging_availability_checks_total";

/// Counter: calendar grids built. Labels: status.
pub const CALENDAR_BUILDS_TOTAL: &str = "lodging_calendar_builds_total";

/// Counter: reconcile row operations. Labels: op (delete, insert), status (ok, missing, failed).
pub const RECONCILE_OPS_TOTAL: &str = "lodging_reconcile_ops_total";

/// Histogram: store call latency in seconds. Labels: call.
pub const STORE_CALL_DURATION_SECONDS: &str = "lodging_store_call_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: block snapshots waiting in the vault.
pub const SNAPSHOTS_ACTIVE: &str = "lodging_snapshots_active";

/// Install a fmt subscriber for `tracing`. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a reconcile outcome to its metrics status label.
pub fn outcome_label(outcome: &crate::engine::RowOutcome) -> &'static str {
    use crate::engine::RowOutcome;
    match outcome {
        RowOutcome::Applied => "ok",
        RowOutcome::AlreadyGone => "missing",
        RowOutcome::Failed(_) => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RowOutcome;

    #[test]
    fn no_port_means_no_exporter() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&RowOutcome::Applied), "ok");
        assert_eq!(outcome_label(&RowOutcome::AlreadyGone), "missing");
        assert_eq!(outcome_label(&RowOutcome::Failed("timeout".into())), "failed");
    }
}
