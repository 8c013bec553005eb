use anyhow::Result;
use axum::serve;
use server::{build_gate, create_app, metrics::prometheus_handle, AppState};
use std::{net::SocketAddr, path::Path};
use sublimit_core::{
    clock::system_clock,
    config::{AppConfig, LedgerBackend},
    ledger,
};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins over `[logging].level` when set.
fn init_logging(config: &AppConfig) {
    let default_directives = format!(
        "warn,sublimit_core={level},server={level}",
        level = config.logging.level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&default_directives));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!("Starting subscription gateway");
    debug!(
        backend = ?config.ledger.backend,
        static_sources = config.sources.static_sources.len(),
        trial_rpm = ?config.plans.trial_requests_per_minute,
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    if let Some(parent) = sqlite_parent_dir(&config) {
        std::fs::create_dir_all(parent)?;
    }

    let prometheus = prometheus_handle();
    let clock = system_clock();
    let ledger = ledger::open(&config.ledger, clock.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Ledger initialization failed: {e}"))?;
    let gate = build_gate(&config, ledger, clock)?;

    let app = create_app(AppState { gate, prometheus }, &config)?;
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    info!(address = %addr, "Gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Directory holding the ledger database file, when it is file-backed.
fn sqlite_parent_dir(config: &AppConfig) -> Option<&Path> {
    if config.ledger.backend != LedgerBackend::Sqlite {
        return None;
    }
    let path = config.ledger.database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next()?;
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
}
