//! Power-plant process.
//!
//! Prompts for the plant id and peer port until the plant starts (occupied
//! ports and id conflicts re-prompt instead of terminating), then waits for
//! the `exit` command on standard input.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;
use voltring_core::{PlantConfig, PlantError, PowerPlant};

/// Voltring power plant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plant identity; prompted for when omitted
    #[arg(long, env = "PLANT_ID")]
    plant_id: Option<u32>,

    /// Peer RPC listen port; prompted for when omitted
    #[arg(long, env = "PLANT_PORT")]
    port: Option<u16>,

    /// Address other plants use to reach this one
    #[arg(long, env = "PLANT_ADDRESS", default_value = "localhost")]
    address: String,

    /// Base URL of the administration server
    #[arg(
        long,
        env = "ADMIN_SERVER_BASE_URL",
        default_value = "http://localhost:8080"
    )]
    admin_base_url: String,

    /// MQTT broker URI
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "tcp://localhost:1883")]
    mqtt_broker_url: String,

    /// Topic carrying inbound energy requests
    #[arg(
        long,
        env = "MQTT_TOPIC_ENERGY_REQUESTS",
        default_value = "voltring/energy-requests"
    )]
    energy_request_topic: String,

    /// Topic for outbound pollution batches
    #[arg(
        long,
        env = "MQTT_TOPIC_POLLUTION_PUBLISH",
        default_value = "voltring/pollution"
    )]
    pollution_topic: String,

    /// Bid price lower bound
    #[arg(long, env = "PRICE_MIN", default_value_t = 0.1)]
    price_min: f64,

    /// Bid price upper bound
    #[arg(long, env = "PRICE_MAX", default_value_t = 0.9)]
    price_max: f64,

    /// Deadline for outbound peer RPCs, in seconds
    #[arg(long, default_value_t = 5)]
    rpc_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    // One thread owns stdin; both the configuration prompts and the command
    // loop read from this channel.
    let (line_tx, mut lines) = mpsc::channel::<String>(4);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("===== Power Plant Configuration =====");
    let mut preset_id = args.plant_id;
    let mut preset_port = args.port;

    let mut plant = loop {
        let plant_id = match preset_id.take() {
            Some(id) => id,
            None => match prompt_parse::<u32>("Enter Plant ID: ", &mut lines).await {
                Some(id) => id,
                None => return ExitCode::FAILURE,
            },
        };
        let port = match preset_port.take() {
            Some(port) => port,
            None => match prompt_parse::<u16>("Enter Port: ", &mut lines).await {
                Some(port) => port,
                None => return ExitCode::FAILURE,
            },
        };

        let mut config = PlantConfig::default()
            .with_identity(plant_id, port)
            .with_price_range(args.price_min, args.price_max)
            .with_admin_base_url(args.admin_base_url.clone())
            .with_broker_url(args.mqtt_broker_url.clone());
        config.address = args.address.clone();
        config.energy_request_topic = args.energy_request_topic.clone();
        config.pollution_topic = args.pollution_topic.clone();
        config.rpc_timeout = Duration::from_secs(args.rpc_timeout_secs);

        let mut plant = match PowerPlant::new(config) {
            Ok(plant) => plant,
            Err(e) => {
                eprintln!("FATAL: {e}");
                return ExitCode::FAILURE;
            }
        };

        match plant.start().await {
            Ok(()) => {
                println!("PowerPlant {plant_id} started successfully");
                println!("Connected to admin server at: {}", args.admin_base_url);
                break plant;
            }
            Err(PlantError::RegistrationConflict(id)) => {
                eprintln!("\n--- REGISTRATION FAILED ---");
                eprintln!("REASON: plant id {id} is already registered");
                eprintln!("Please choose a different Plant ID.\n");
                plant.stop().await;
            }
            Err(PlantError::PortInUse(port)) => {
                eprintln!("\n--- STARTUP FAILED ---");
                eprintln!("REASON: port {port} is already in use");
                eprintln!("Please choose a different Port.\n");
                plant.stop().await;
            }
            Err(e) => {
                error!("fatal startup error for plant {plant_id}: {e}");
                plant.stop().await;
                return ExitCode::FAILURE;
            }
        }
    };

    println!("PowerPlant is running.");
    println!("Enter 'exit' to shut down the PowerPlant:");
    while let Some(line) = lines.recv().await {
        let command = line.trim().to_lowercase();
        if command == "exit" {
            break;
        }
        if !command.is_empty() {
            println!("Unknown command. Enter 'exit' to shut down.");
        }
    }

    println!("Shutting down PowerPlant...");
    plant.stop().await;
    ExitCode::SUCCESS
}

async fn prompt_parse<T: std::str::FromStr>(
    label: &str,
    lines: &mut mpsc::Receiver<String>,
) -> Option<T> {
    loop {
        print!("{label}");
        let _ = io::stdout().flush();
        let line = lines.recv().await?;
        match line.trim().parse::<T>() {
            Ok(value) => return Some(value),
            Err(_) => eprintln!("Error: value must be a valid number. Please try again."),
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
