//! Command-line interface for the Bifrost message bridge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bifrost_core::BridgeConfig;
use bifrost_devices::{DeviceRegistry, InfluxSink, NullSink, TelemetrySink};
use bifrost_dispatcher::{run, Dispatcher, EspNowHandler, HandlerSet, MqttHandler};

/// Bifrost - bridge ESP-NOW and MQTT devices into one message space.
#[derive(Parser, Debug)]
#[command(name = "bifrost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the dispatcher and run until interrupted.
    Run,
    /// Print the registered devices and exit.
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config.display()))?;

    match args.command {
        Command::Run => run_bridge(config).await,
        Command::Devices => list_devices(config),
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    info!("Starting dispatcher...");

    // A corrupt registry file is fatal at startup by design.
    let registry = DeviceRegistry::load(&config.paths.device_registry)?;

    let telemetry: Arc<dyn TelemetrySink> = match &config.influx {
        Some(influx) => {
            info!("Telemetry sink: InfluxDB at {}", influx.url);
            Arc::new(InfluxSink::new(influx))
        }
        None => Arc::new(NullSink),
    };

    // Broker subscriptions: the configured topics plus every registered
    // MQTT device topic.
    let mut topics: Vec<String> = config.mqtt.topics.clone();
    topics.extend(registry.mqtt_topics().into_iter().map(String::from));

    let mut handlers = HandlerSet::new();
    handlers.insert(Arc::new(MqttHandler::connect(&config.mqtt, topics)));
    handlers.insert(Arc::new(
        EspNowHandler::connect(&config.uart.port, config.uart.baudrate)
            .context("opening the ESP-NOW serial port")?,
    ));

    let mut dispatcher = Dispatcher::new(registry, handlers, telemetry);

    info!("Dispatcher started");
    run(&mut dispatcher, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await?;

    Ok(())
}

fn list_devices(config: BridgeConfig) -> Result<()> {
    let registry = DeviceRegistry::load(&config.paths.device_registry)?;

    if registry.is_empty() {
        println!("no devices registered");
        return Ok(());
    }

    println!("{:<20} {:<8} {:<16} destination", "id", "protocol", "type");
    for (id, record) in registry.iter() {
        println!(
            "{:<20} {:<8} {:<16} {}",
            id,
            record.protocol(),
            record.device_type(),
            record.destination()
        );
    }

    Ok(())
}
