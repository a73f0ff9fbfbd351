//! Comanda Server - Main entry point.
//!
//! This binary starts the Comanda gateway with:
//! - Structured JSON logging for production
//! - A background database connectivity check that never blocks the listener
//! - Graceful shutdown handling (SIGTERM/SIGINT) that closes realtime connections
//!
//! # Configuration
//!
//! See [`comanda_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (X-Empresa-Id header trusted)
//! FRONTEND_URL=http://localhost:5173 \
//! COMANDA_UNSAFE_TRUST_TENANT_HEADER=true \
//! cargo run --bin comanda-server
//!
//! # Production mode
//! FRONTEND_URL=https://app.comanda.example \
//! COMANDA_API_TOKENS="svc-token-1:42,svc-token-2:7" \
//! DB_HOST=db.internal \
//! cargo run --release --bin comanda-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use comanda_server::config::Config;
use comanda_server::database::DatabaseProbe;
use comanda_server::error::ServerError;
use comanda_server::pipeline::create_router;
use comanda_server::routes::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(ServerError::Config(err)) => {
            error!(error = %err, "Failed to load configuration");
            print_usage(&err);
            ExitCode::from(1)
        }
        Err(err) => {
            error!(error = %err, "Server stopped with an error");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let config = Config::from_env()?;

    let tenant_mode = if config.unsafe_trust_tenant_header {
        "header (UNSAFE)"
    } else {
        "bearer token"
    };
    info!(
        port = config.port,
        tenant_mode = tenant_mode,
        token_count = config.api_tokens.len(),
        allowed_origins = ?config.allowed_origins,
        uploads_dir = %config.uploads_dir.display(),
        "Comanda server starting"
    );

    let probe = DatabaseProbe::from_config(&config);
    let state = AppState::new(config.clone());
    let connections = state.connections.clone();
    let app = create_router(state);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    info!(port = config.port, address = %address, "Server listening");

    // The listener is already accepting; the check only reports.
    let probe_handle = probe.spawn_startup_check();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let closed = connections.close_all();
            info!(connections = closed, "Closing realtime connections");
        })
        .await
        .map_err(ServerError::Serve)?;

    info!("Server shutting down gracefully");
    if !probe_handle.is_finished() {
        warn!("Database connectivity check still running, aborting it");
        probe_handle.abort();
    }
    Ok(())
}

/// Prints configuration help after a configuration error.
fn print_usage(err: &dyn std::error::Error) {
    eprintln!("Error: {err}");
    eprintln!();
    eprintln!("Required environment variables:");
    eprintln!("  FRONTEND_URL        - Trusted frontend origin(s), comma separated");
    eprintln!("  COMANDA_API_TOKENS  - Format: token1:empresa1,token2:empresa2");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  PORT                               - HTTP server port (default: 3001)");
    eprintln!("  UPLOADS_DIR                        - Static upload directory (default: public/uploads)");
    eprintln!("  DB_HOST                            - Database host checked at startup");
    eprintln!("  DB_PORT                            - Database port (default: 3306)");
    eprintln!("  RUST_LOG                           - Log level filter (default: info)");
    eprintln!("  COMANDA_UNSAFE_TRUST_TENANT_HEADER - Trust X-Empresa-Id (dev only, set to 'true')");
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output for production use with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when a shutdown signal is received.
///
/// Listens for:
/// - SIGTERM (container orchestrator shutdown)
/// - SIGINT (Ctrl+C)
///
/// If a handler cannot be installed, that signal is ignored and the other
/// one still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
