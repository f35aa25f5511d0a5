//! Standalone robot hub
//!
//! Run with: cargo run --example hub_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example hub_server                    # binds to 0.0.0.0:8000
//!   cargo run --example hub_server localhost          # binds to 127.0.0.1:8000
//!   cargo run --example hub_server 127.0.0.1:8100     # binds to 127.0.0.1:8100
//!
//! ## Configuration
//!
//! Everything else comes from the environment:
//!
//!   ROBOT_HUB_INFERENCE_URL          object detection endpoint (multipart POST)
//!   ROBOT_HUB_INFERENCE_TIMEOUT_MS   per-call timeout, clamped to 100..=5000
//!   ROBOT_HUB_DATABASE               SQLite file for telemetry history
//!   ROBOT_HUB_HISTORY_CAPACITY       history queue size (default 1000)
//!   ROBOT_HUB_PERSISTENCE_WORKERS    number of history writers (default 1)
//!
//! ## Producing
//!
//!   websocat ws://localhost:8000/ingest/telemetry/sim/tb3_1
//!   {"type":"battery","data":{"percentage":87.5}}
//!
//! ## Viewing
//!
//!   websocat ws://localhost:8000/view/telemetry/sim/tb3_1

use std::net::SocketAddr;

use robot_hub::{Hub, HubConfig, HubServer};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8000
/// - "localhost:8100" -> 127.0.0.1:8100
/// - "127.0.0.1" -> 127.0.0.1:8000
/// - "0.0.0.0:8100" -> 0.0.0.0:8100
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8000;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: hub_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: ROBOT_HUB_BIND or 0.0.0.0:8000)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("robot_hub=debug".parse()?)
                .add_directive("hub_server=debug".parse()?),
        )
        .init();

    let mut config = HubConfig::from_env();
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config.server = config.server.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    println!("Starting robot hub on {}", config.server.bind_addr);
    match &config.inference.endpoint {
        Some(url) => println!("  inference: {}", url),
        None => println!("  inference: disabled"),
    }
    match &config.persistence.database {
        Some(path) => println!("  history:   {}", path.display()),
        None => println!("  history:   disabled"),
    }
    println!();

    let hub = Hub::start(config)?;
    let server = HubServer::new(hub.clone());

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    hub.shutdown().await;

    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
