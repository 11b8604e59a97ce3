//! Administration CLI.
//!
//! A small menu-driven client for the administration service: list the
//! registered plants or query the overall CO2 average over a time range.

use clap::Parser;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use voltring_core::types::PlantInfo;

/// Voltring administration client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the administration server
    #[arg(
        long,
        env = "ADMIN_SERVER_BASE_URL",
        default_value = "http://localhost:8080"
    )]
    admin_base_url: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let base_url = args.admin_base_url.trim_end_matches('/').to_string();
    let http = Client::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!();
        println!("===== Administration Client =====");
        println!("1) List registered plants");
        println!("2) Average CO2 over a time range");
        println!("3) Exit");
        let Some(choice) = prompt(&mut lines, "> ") else {
            return ExitCode::SUCCESS;
        };
        match choice.trim() {
            "1" => list_plants(&http, &base_url),
            "2" => co2_average(&http, &base_url, &mut lines),
            "3" => return ExitCode::SUCCESS,
            "" => {}
            other => println!("Unknown option '{other}'. Enter 1, 2 or 3."),
        }
    }
}

fn list_plants(http: &Client, base_url: &str) {
    let url = format!("{base_url}/plants");
    match http.get(&url).send().and_then(|r| r.json::<Vec<PlantInfo>>()) {
        Ok(plants) if plants.is_empty() => println!("No plants registered."),
        Ok(plants) => {
            println!("{} registered plant(s):", plants.len());
            for plant in plants {
                println!(
                    "  id {:>4}  {}:{}  registered at {}",
                    plant.plant_id, plant.address, plant.port, plant.registration_time
                );
            }
        }
        Err(e) => eprintln!("Could not list plants: {e}"),
    }
}

fn co2_average(
    http: &Client,
    base_url: &str,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) {
    let Some(t1) = prompt_u64(lines, "t1 (ms): ") else {
        return;
    };
    let Some(t2) = prompt_u64(lines, "t2 (ms): ") else {
        return;
    };
    let url = format!("{base_url}/statistics/co2/average?t1={t1}&t2={t2}");
    let response = match http.get(&url).send() {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Could not query the CO2 average: {e}");
            return;
        }
    };
    match response.status() {
        StatusCode::OK => match response.json::<f64>() {
            Ok(average) => println!("Average CO2 over [{t1}, {t2}]: {average:.2}"),
            Err(e) => eprintln!("Unreadable answer: {e}"),
        },
        status => {
            let reason = response
                .json::<serde_json::Value>()
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());
            println!("Server answered {status}: {reason}");
        }
    }
}

fn prompt(lines: &mut impl Iterator<Item = io::Result<String>>, label: &str) -> Option<String> {
    print!("{label}");
    let _ = io::stdout().flush();
    lines.next()?.ok()
}

fn prompt_u64(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    label: &str,
) -> Option<u64> {
    loop {
        let line = prompt(lines, label)?;
        match line.trim().parse::<u64>() {
            Ok(value) => return Some(value),
            Err(_) => println!("Enter a millisecond timestamp (non-negative integer)."),
        }
    }
}
