//! Administration service.
//!
//! Registers plants, lists them, and answers CO2 statistics queries over the
//! pollution batches the plants publish to the broker.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod mqtt;
mod routes;
mod state;

use state::AppState;

/// Voltring administration server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP listen port
    #[arg(short, long, env = "ADMIN_PORT", default_value = "8080")]
    port: u16,

    /// MQTT broker URI
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "tcp://localhost:1883")]
    mqtt_broker_url: String,

    /// Topic the plants publish pollution batches on
    #[arg(
        long,
        env = "MQTT_TOPIC_POLLUTION_PUBLISH",
        default_value = "voltring/pollution"
    )]
    pollution_topic: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let state = Arc::new(AppState::new());
    let shutdown = CancellationToken::new();

    if let Err(e) = mqtt::start_pollution_subscriber(
        &args.mqtt_broker_url,
        args.pollution_topic.clone(),
        state.clone(),
        shutdown.child_token(),
    ) {
        error!("failed to start pollution subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let app = routes::router(state);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {}: {e}", args.port);
            return ExitCode::FAILURE;
        }
    };
    info!("administration server listening on port {}", args.port);

    let serve_shutdown = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            serve_shutdown.cancel();
        })
        .await;

    shutdown.cancel();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("administration server failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}
