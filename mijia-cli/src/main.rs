//! Command line client for Mijia BLE thermometers
//!
//! Scans for sensors advertising the Mijia service and collects battery,
//! temperature and humidity readings from each one found.

use std::collections::HashMap;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mijia_sensor::ble::Adapter;
use mijia_sensor::{ble, discover, DiscoverConfig};

#[derive(Parser)]
#[command(name = "mijia")]
#[command(about = "Discover Mijia BLE thermometers and collect their readings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for sensors and list what was found
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,
        /// Register every device instead of only Mijia sensors
        #[arg(long)]
        unfiltered: bool,
    },
    /// Discover sensors, then read each one in turn
    Collect {
        /// Stop discovery once this many sensors are registered
        #[arg(short, long)]
        count: Option<usize>,
        /// Discovery timeout in seconds
        #[arg(short, long, default_value = "120")]
        timeout: u64,
        /// Per-device acquisition timeout in seconds
        #[arg(short, long, default_value = "60")]
        acquire_timeout: u64,
        /// Label a known address, repeatable (addr=name). With no --count,
        /// discovery stops once every labelled sensor is found.
        #[arg(long = "alias", value_parser = parse_alias)]
        aliases: Vec<(String, String)>,
    },
}

fn parse_alias(s: &str) -> Result<(String, String), String> {
    let (addr, name) = s
        .split_once('=')
        .ok_or_else(|| format!("expected addr=name, got '{s}'"))?;
    Ok((addr.to_lowercase(), name.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let adapter = ble::default_adapter().await?;

    match cli.command {
        Commands::Scan {
            duration,
            unfiltered,
        } => scan(adapter, duration, unfiltered).await?,
        Commands::Collect {
            count,
            timeout,
            acquire_timeout,
            aliases,
        } => collect(adapter, count, timeout, acquire_timeout, aliases).await?,
    }

    Ok(())
}

/// RUST_LOG selects levels; info is the default.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn scan(
    adapter: Adapter,
    duration: u64,
    unfiltered: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for sensors ({duration} seconds)...");

    let config = DiscoverConfig {
        timeout: Some(Duration::from_secs(duration)),
        service_filter: if unfiltered {
            None
        } else {
            Some(mijia_proto::ADVERTISED_SERVICE)
        },
        ..DiscoverConfig::default()
    };
    let handle = discover(
        adapter,
        config,
        |device, _registry| {
            let name = device.info.local_name.as_deref().unwrap_or("Unknown");
            let rssi = device
                .info
                .rssi
                .map(|r| format!("{r} dBm"))
                .unwrap_or_else(|| "N/A".to_string());
            println!("  {} ({}) RSSI: {}", name, device.info.key(), rssi);
            true
        },
        |registry| {
            println!("\nFound {} sensor(s)", registry.len());
        },
    )
    .await?;

    handle.wait().await;
    Ok(())
}

async fn collect(
    adapter: Adapter,
    count: Option<usize>,
    timeout: u64,
    acquire_timeout: u64,
    aliases: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let aliases: HashMap<String, String> = aliases.into_iter().collect();
    let quota = count.or_else(|| (!aliases.is_empty()).then_some(aliases.len()));

    let config = DiscoverConfig {
        timeout: Some(Duration::from_secs(timeout)),
        ..DiscoverConfig::default()
    };
    let names = aliases.clone();
    let handle = discover(
        adapter,
        config,
        move |device, registry| {
            let key = device.info.key();
            let name = names.get(key).map(String::as_str).unwrap_or(key);
            match quota {
                Some(quota) => {
                    println!("discovered {} ({}/{})", name, registry.len(), quota);
                    registry.len() < quota
                }
                None => {
                    println!("discovered {} ({})", name, registry.len());
                    true
                }
            }
        },
        |registry| {
            println!("discovery timeout, {} sensor(s) found", registry.len());
        },
    )
    .await?;

    let registry = handle.wait().await;
    if registry.is_empty() {
        println!("No sensors found");
        return Ok(());
    }

    // One device at a time; the adapter handles one connection attempt well.
    let mut out = serde_json::Map::new();
    for (key, device) in &registry {
        let name = aliases.get(key).cloned().unwrap_or_else(|| key.clone());
        println!("Collecting from {name}...");
        match device
            .acquire(Some(Duration::from_secs(acquire_timeout)))
            .await
        {
            Ok(result) => {
                if result.timed_out {
                    println!("  timed out after {} ms, keeping partial data", result.duration_ms);
                }
                out.insert(name, serde_json::to_value(&result)?);
            }
            Err(err) => println!("  failed: {err}"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(out))?);

    Ok(())
}
