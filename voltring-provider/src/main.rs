//! Renewable-energy provider.
//!
//! Periodically generates an energy request with a fresh uuid and a random
//! amount, and broadcasts it to the plants over the broker at QoS 2.

use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;
use voltring_core::config::parse_broker_url;
use voltring_core::types::{unix_timestamp_ms, EnergyRequest};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Voltring renewable-energy provider
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker URI
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "tcp://localhost:1883")]
    mqtt_broker_url: String,

    /// Topic energy requests are published on
    #[arg(
        long,
        env = "MQTT_TOPIC_ENERGY_REQUESTS",
        default_value = "voltring/energy-requests"
    )]
    energy_request_topic: String,

    /// Seconds between broadcast requests
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,

    /// Smallest requested amount in kWh
    #[arg(long, default_value_t = 5_000)]
    min_amount_kwh: u32,

    /// Largest requested amount in kWh
    #[arg(long, default_value_t = 15_000)]
    max_amount_kwh: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    if args.min_amount_kwh == 0 || args.min_amount_kwh > args.max_amount_kwh {
        error!(
            "amount bounds must satisfy 0 < min <= max, got [{}, {}]",
            args.min_amount_kwh, args.max_amount_kwh
        );
        return ExitCode::FAILURE;
    }
    let (host, port) = match parse_broker_url(&args.mqtt_broker_url) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut options = MqttOptions::new("voltring-provider", host, port);
    options.set_keep_alive(Duration::from_secs(10));
    let (client, mut event_loop) = AsyncClient::new(options, 64);

    tokio::spawn(async move {
        loop {
            if let Err(e) = event_loop.poll().await {
                warn!("broker connection error: {e}; reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    });

    info!(
        "broadcasting a request every {}s on '{}'",
        args.interval_secs, args.energy_request_topic
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let request = generate_request(args.min_amount_kwh, args.max_amount_kwh);
                publish_request(&client, &args.energy_request_topic, &request).await;
            }
        }
    }

    info!("shutting down provider");
    let _ = client.disconnect().await;
    ExitCode::SUCCESS
}

fn generate_request(min_amount_kwh: u32, max_amount_kwh: u32) -> EnergyRequest {
    let amount = rand::thread_rng().gen_range(min_amount_kwh..=max_amount_kwh);
    EnergyRequest::new(Uuid::new_v4().to_string(), amount, unix_timestamp_ms())
}

async fn publish_request(client: &AsyncClient, topic: &str, request: &EnergyRequest) {
    let payload = match serde_json::to_vec(request) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("failed to encode energy request: {e}");
            return;
        }
    };
    match client.publish(topic, QoS::ExactlyOnce, false, payload).await {
        Ok(()) => info!(
            "published energy request {} for {} kWh",
            request.request_id, request.amount_kwh
        ),
        Err(e) => warn!(
            "failed to publish energy request {}: {e}",
            request.request_id
        ),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_requests_stay_in_bounds_with_unique_ids() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let request = generate_request(5_000, 15_000);
            assert!((5_000..=15_000).contains(&request.amount_kwh));
            assert!(!request.request_id.trim().is_empty());
            assert!(seen.insert(request.request_id));
        }
    }
}
