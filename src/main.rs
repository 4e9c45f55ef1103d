use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use deskbook::alerts::{AlertEngine, run_alert_scanner};
use deskbook::config::Config;
use deskbook::engine::Engine;
use deskbook::notify::NotifyHub;
use deskbook::reaper::{run_compactor, run_reconciler};
use deskbook::view::{OccupancyView, run_view_sync};
use deskbook::wire::{self, ServerState};

/// Full snapshot interval for the server-side occupancy cache.
const VIEW_POLL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    deskbook::observability::init(config.metrics_port)?;
    let tls_acceptor = config.tls_acceptor()?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify,
        config.engine.clone(),
    )?);
    let queued = engine.verify_ledger().await;
    if queued > 0 {
        tracing::warn!("{queued} bookings need ledger repair after replay");
    }

    let alerts = Arc::new(AlertEngine::new(config.alert_thresholds.clone()));
    let view = Arc::new(OccupancyView::new());
    let background = CancellationToken::new();

    let tasks = vec![
        tokio::spawn(run_compactor(
            engine.clone(),
            config.compact_threshold,
            background.clone(),
        )),
        tokio::spawn(run_reconciler(
            engine.clone(),
            config.reconcile_interval,
            background.clone(),
        )),
        tokio::spawn(run_alert_scanner(
            engine.clone(),
            alerts.clone(),
            config.alert_interval,
            background.clone(),
        )),
        tokio::spawn(run_view_sync(
            engine.clone(),
            view.clone(),
            VIEW_POLL,
            background.clone(),
        )),
    ];

    let state = ServerState {
        engine,
        alerts,
        view,
    };
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("deskbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  timezone: {}", config.engine.timezone);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable ({e}), ctrl-c only");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(deskbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(deskbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(deskbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let state = state.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, state, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(deskbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    background.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("background task failed: {e}");
        }
    }

    info!("deskbook stopped");
    Ok(())
}
