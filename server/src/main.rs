//! modl signup server - Main entry point.
//!
//! This binary starts the registration server with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Background rate limiter cleanup
//!
//! # Configuration
//!
//! See [`modl_signup::config`] for environment variable configuration.
//! A `.env` file in the working directory is loaded if present.
//!
//! # Example
//!
//! ```bash
//! TURNSTILE_SECRET_KEY="0x4AAAAAAA..." \
//! SMTP_HOST=mail.internal \
//! PORT=8080 \
//! cargo run --release --bin modl-signup
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use modl_signup::config::Config;
use modl_signup::routes::{create_router, AppState};

/// Cleanup interval for expired rate limiter entries (60 seconds).
const RATE_LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is normal in production.
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    init_logging();

    if dotenv_loaded {
        info!("Loaded environment from .env");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Environment variables:");
            eprintln!("  PORT                          - HTTP server port (default: 8080)");
            eprintln!("  APP_DOMAIN                    - Panel base domain (default: modl.gg)");
            eprintln!("  TURNSTILE_SECRET_KEY          - Turnstile secret (required to accept signups)");
            eprintln!("  TURNSTILE_VERIFY_URL          - Siteverify endpoint override");
            eprintln!("  SMTP_HOST                     - SMTP relay host (default: localhost)");
            eprintln!("  SMTP_PORT                     - SMTP relay port (default: 25)");
            eprintln!("  SMTP_USERNAME / SMTP_PASSWORD - SMTP credentials (optional)");
            eprintln!("  MODL_TRUST_PROXY              - Use X-Forwarded-For for client IPs ('true')");
            eprintln!("  MODL_OUTBOUND_TIMEOUT_SECS    - Turnstile/SMTP timeout (default: 5)");
            eprintln!("  MODL_REGISTRATION_WINDOW_SECS - Seconds between registrations per IP (default: 600)");
            eprintln!("  RUST_LOG                      - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        app_domain = %config.app_domain,
        smtp_host = %config.smtp.host,
        trust_proxy = config.trust_proxy,
        turnstile_configured = config.turnstile_secret_key.is_some(),
        "modl signup server starting"
    );

    let port = config.port;
    let state = match AppState::from_config(config) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to initialize server components");
            return ExitCode::from(1);
        }
    };

    let cleanup_handle = state
        .rate_limiter
        .spawn_cleanup_task(RATE_LIMITER_CLEANUP_INTERVAL);
    info!(
        interval_secs = RATE_LIMITER_CLEANUP_INTERVAL.as_secs(),
        "Rate limiter cleanup task started"
    );

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(
                error = %err,
                address = %bind_addr,
                "Failed to bind to address"
            );
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");

    cleanup_handle.abort();
    info!("Rate limiter cleanup task stopped");

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output filtered by `RUST_LOG`, defaulting to `info` with request
/// traces from `tower_http`.
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

/// Resolves when SIGTERM or SIGINT is received.
///
/// axum stops accepting connections and waits for in-flight registrations
/// to finish once this returns.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
