//! AIPipe -- authenticating, cost-metering reverse proxy for LLM APIs.
//!
//! This is the application entry point. It wires together all modules:
//!   - Environment configuration
//!   - Database initialization
//!   - Adapter registry + metering loop
//!   - HTTP server
//!   - Graceful shutdown on SIGTERM / SIGINT

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use aipipe::api;
use aipipe::config::Config;
use aipipe::db::Database;
use aipipe::meter::spawn_meter_loop;
use aipipe::AppState;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

fn parse_args() {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("aipipe {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }
}

fn print_usage() {
    println!(
        "\
aipipe {version} -- cost-metering LLM API gateway

USAGE:
    aipipe

ENVIRONMENT:
    AIPIPE_SECRET          HS256 signing secret (required)
    OPENAI_API_KEY         Server-held OpenAI key
    OPENROUTER_API_KEY     Server-held OpenRouter key
    GEMINI_API_KEY         Server-held Gemini key
    ADMIN_EMAILS           Comma/whitespace-separated admin emails
    AIPIPE_LISTEN          Bind address [default: 0.0.0.0:8787]
    AIPIPE_DB              SQLite path [default: aipipe.sqlite3]
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    parse_args();

    // 2. Load configuration
    let config = Config::from_env()?;

    // 3. Initialize tracing/logging
    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        admins = config.admin_emails.len(),
        "Starting aipipe"
    );

    // 4. Open database
    let db = Database::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "Database opened");

    // 5. Metering channel + background loop
    let (meter_tx, meter_rx) = tokio::sync::mpsc::unbounded_channel();

    // 6. Build shared application state
    let listen = config.listen.clone();
    let state = AppState::new(config, db, meter_tx);
    tracing::info!(adapters = ?state.registry.ids(), "Adapters registered");

    let meter_handle = spawn_meter_loop(
        state.ledger.clone(),
        state.registry.clone(),
        meter_rx,
    );

    // 7. Build the router
    let app = api::build_router(state);

    // 8. Bind and serve with graceful shutdown
    let listener = TcpListener::bind(&listen).await?;
    tracing::info!(addr = %listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 9. Cleanup: the router (and with it every meter sender) is dropped
    //    once serve returns, so the metering loop drains and exits.
    tracing::info!("Shutting down gracefully");
    meter_handle.await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

fn init_tracing() {
    // RUST_LOG env var takes precedence over the built-in default
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aipipe=info,tower_http=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
