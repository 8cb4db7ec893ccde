// gattkit — BLE GATT peripheral CLI
//
// Publishes a GATT profile described in the config file through BlueZ,
// advertises it, and reports centrals as they come and go.

mod config;
mod profile;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use gattkit_core::bus::system::SystemBus;
use gattkit_core::{
    Adapter, BusConnection, BusContext, ConnectionDelegate, GattUuid, ObjectPath, Peripheral,
};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gattkit")]
#[command(about = "GattKit — BLE GATT peripheral for BlueZ", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the configured profile and serve it until Ctrl-C
    Run {
        /// Adapter name or object path (overrides config)
        #[arg(short, long)]
        adapter: Option<String>,
        /// Device name (overrides config)
        #[arg(short, long)]
        name: Option<String>,
        /// Skip LE advertising
        #[arg(long)]
        no_advertise: bool,
        /// Cycle the battery level every 10 seconds
        #[arg(long)]
        simulate: bool,
    },
    /// Show adapter status
    Status {
        #[arg(short, long)]
        adapter: Option<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the canonical forms of an attribute identifier
    Uuid { input: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _guard = init_logging(&config);

    match cli.command {
        Commands::Run {
            adapter,
            name,
            no_advertise,
            simulate,
        } => cmd_run(config, adapter, name, no_advertise, simulate).await,
        Commands::Status { adapter } => cmd_status(config, adapter).await,
        Commands::Config { action } => cmd_config(config, action),
        Commands::Uuid { input } => cmd_uuid(&input),
    }
}

/// RUST_LOG wins over the configured level. With `log_dir` set, output goes
/// to a daily rolling file instead of stderr; keep the guard alive.
fn init_logging(config: &config::Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gattkit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn open_adapter(bus: Arc<dyn BusConnection>, name: &str) -> Result<Adapter> {
    if name.starts_with('/') {
        let path = ObjectPath::new(name).context("Invalid adapter path")?;
        return Ok(Adapter::new(bus, path));
    }
    Adapter::locate(bus, name)
        .await
        .with_context(|| format!("No Bluetooth adapter available (wanted {})", name))
}

/// Prints connection events as they arrive
struct ConsoleDelegate;

impl ConnectionDelegate for ConsoleDelegate {
    fn on_connected(&self, address: &str, _path: &ObjectPath) {
        println!("{} Central connected: {}", "→".green(), address.bright_cyan());
    }

    fn on_disconnected(&self, address: &str, _path: &ObjectPath) {
        println!("{} Central disconnected: {}", "←".yellow(), address.bright_cyan());
    }
}

async fn cmd_run(
    config: config::Config,
    adapter: Option<String>,
    name: Option<String>,
    no_advertise: bool,
    simulate: bool,
) -> Result<()> {
    let mut config = config;
    if let Some(name) = name {
        config.device_name = name;
    }
    let adapter_name = adapter.unwrap_or_else(|| config.adapter.clone());

    println!("{}", "Starting GattKit peripheral...".bold());

    let bus: Arc<dyn BusConnection> = SystemBus::connect()
        .await
        .context("Failed to connect to the system bus")?;
    let adapter = open_adapter(bus.clone(), &adapter_name).await?;

    let ctx = BusContext::new(bus, adapter.path().clone())
        .with_options(config.registration_options());
    ctx.tracker().set_delegate(Arc::new(ConsoleDelegate));

    let app = profile::build_application(&config)?;
    let mut peripheral =
        Peripheral::new(ctx, app.clone()).with_alias(config.device_name.clone());
    if config.advertise && !no_advertise {
        peripheral = peripheral.with_advertisement(profile::build_advertisement(&config, &app)?);
    }

    peripheral
        .start()
        .await
        .context("Failed to start the peripheral")?;

    println!("{} Peripheral running", "✓".green());
    println!("  Adapter:     {}", adapter.path().to_string().bright_cyan());
    println!("  Name:        {}", config.device_name.bright_cyan());
    println!("  Application: {}", app.path().to_string().bright_cyan());
    for service in app.services() {
        println!(
            "  Service:     {} ({} characteristic(s))",
            service.uuid(),
            service.characteristics().len()
        );
    }
    match peripheral.advertising_mode() {
        Some(mode) => println!("  Advertising: {}", mode.to_string().bright_cyan()),
        None => println!("  Advertising: {}", "off".dimmed()),
    }

    let simulator = if simulate {
        match profile::battery_level(&app) {
            Some(level) => {
                println!("  Simulating battery level every {}s", profile::SIMULATION_PERIOD.as_secs());
                Some(profile::spawn_battery_simulator(level, profile::SIMULATION_PERIOD))
            }
            None => {
                println!("  {}", "No battery level characteristic to simulate".yellow());
                None
            }
        }
    } else {
        None
    };

    println!();
    println!("{}", "Press Ctrl-C to stop".dimmed());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!();
    println!("{}", "Stopping...".bold());
    if let Some(handle) = simulator {
        handle.abort();
    }
    peripheral.context().tracker().clear_delegate();
    peripheral.stop().await.context("Shutdown incomplete")?;
    println!("{} Stopped", "✓".green());

    Ok(())
}

async fn cmd_status(config: config::Config, adapter: Option<String>) -> Result<()> {
    let adapter_name = adapter.unwrap_or(config.adapter);

    let bus: Arc<dyn BusConnection> = SystemBus::connect()
        .await
        .context("Failed to connect to the system bus")?;
    let adapter = open_adapter(bus, &adapter_name).await?;

    let yes_no = |on: bool| if on { "yes".green() } else { "no".red() };

    println!("{}", "Adapter Status".bold());
    println!();
    println!("  {:<14} {}", "Path:", adapter.path().to_string().bright_cyan());
    println!("  {:<14} {}", "Address:", adapter.address().await?);
    println!("  {:<14} {}", "Alias:", adapter.alias().await?);
    println!("  {:<14} {}", "Powered:", yes_no(adapter.is_powered().await?));
    println!(
        "  {:<14} {}",
        "Discoverable:",
        yes_no(adapter.is_discoverable().await?)
    );

    Ok(())
}

fn cmd_config(config: config::Config, action: ConfigAction) -> Result<()> {
    let mut config = config;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<32} {}", key.bright_cyan(), value);
            }

            println!();
            println!("{}", "Services:".bold());
            if config.services.is_empty() {
                println!("  {}", "(none configured)".dimmed());
            }
            for service in &config.services {
                println!("  {}", service.uuid);
                for chr in &service.characteristics {
                    println!(
                        "    {} [{}] = {}",
                        chr.uuid,
                        chr.flags.join(", "),
                        if chr.value.is_empty() { "(empty)" } else { chr.value.as_str() }
                    );
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

fn cmd_uuid(input: &str) -> Result<()> {
    let uuid = GattUuid::parse(input).with_context(|| format!("Not an identifier: {}", input))?;

    println!("  {:<10} {}", "Display:", uuid.to_display_string().bright_cyan());
    println!("  {:<10} {}", "Wire:", uuid.to_wire_string());
    match uuid.short() {
        Some(short) => println!("  {:<10} 0x{:04x}", "Short:", short),
        None => match uuid.medium() {
            Some(medium) => println!("  {:<10} 0x{:08x}", "Short:", medium),
            None => println!("  {:<10} {}", "Short:", "(not base-derived)".dimmed()),
        },
    }

    Ok(())
}
