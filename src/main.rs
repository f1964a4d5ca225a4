//! cronus-link - command-line client for the remapping appliance
//!
//! Starts the engine over the system HID stack, waits for the appliance to
//! identify itself, runs one subcommand and prints results as JSON.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use cronus_link::core::config::Config;
use cronus_link::core::error::CommandFamily;
use cronus_link::core::events::DeviceEvent;
use cronus_link::core::info::DeviceInfo;
use cronus_link::core::settings::DeviceSettings;
use cronus_link::hid::{CronusDevice, HidApiTransport};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for fire-and-forget commands to report a failure
const SETTLE_TIME: Duration = Duration::from_millis(200);

type Device = CronusDevice<HidApiTransport>;
type Events = UnboundedReceiver<DeviceEvent>;

#[derive(Parser)]
#[command(name = "cronus-link", version, about = "Client for the CronusMAX remapping appliance")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the device to identify itself
    #[arg(long, default_value_t = 5)]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print device identity
    Info,
    /// Read and print the settings block
    Settings,
    /// Write settings from a TOML preset
    ApplySettings { preset: PathBuf },
    /// Read the settings block and save it as a TOML preset
    ExportSettings { preset: PathBuf },
    /// Upload a compiled script
    Load { script: PathBuf },
    /// Unload the running script
    Unload,
    /// Advance to the next slot
    Slot,
    /// Turn off the connected controller
    TurnOff,
    /// Stream I/O status snapshots as JSON lines
    Monitor {
        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<usize>,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// Print the default configuration file
    DefaultConfig,
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::DefaultConfig = cli.command {
        print!("{}", Config::default_config_str());
        return Ok(());
    }

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    debug!("Configuration loaded");

    let device = CronusDevice::with_hidapi(&config).context("Failed to initialize HID API")?;
    let mut events = device.subscribe();
    device.start();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let timeout = Duration::from_secs(cli.wait);
    let result = rt.block_on(run(&device, &mut events, cli.command, timeout));
    device.stop();
    result
}

async fn run(device: &Device, events: &mut Events, command: Commands, timeout: Duration) -> Result<()> {
    let info = wait_ready(device, events, timeout).await?;
    info!(
        "Appliance ready (firmware {})",
        info.firmware.map(|f| f.to_string()).unwrap_or_else(|| "unknown".into())
    );

    match command {
        Commands::Info => print_json(&info),
        Commands::Settings => {
            let settings = read_settings(device, events, timeout).await?;
            print_json(&settings)
        }
        Commands::ApplySettings { preset } => {
            let settings = DeviceSettings::load_preset(&preset)?;
            device.save_settings(&settings)?;
            let stored = read_settings(device, events, timeout).await?;
            if stored != settings {
                warn!("Device settings differ from the preset after saving");
            }
            print_json(&stored)
        }
        Commands::ExportSettings { preset } => {
            let settings = read_settings(device, events, timeout).await?;
            settings.save_preset(&preset)?;
            info!("Settings saved to {:?}", preset);
            Ok(())
        }
        Commands::Load { script } => {
            device.load_script_file(&script)?;
            settle(device, events, CommandFamily::LoadScript).await
        }
        Commands::Unload => {
            device.unload_script();
            settle(device, events, CommandFamily::UnloadScript).await
        }
        Commands::Slot => {
            device.change_slot()?;
            settle(device, events, CommandFamily::ChangeSlot).await
        }
        Commands::TurnOff => {
            device.turn_off_controller();
            settle(device, events, CommandFamily::TurnOffController).await
        }
        Commands::Monitor { count, interval_ms } => {
            monitor(device, events, count, Duration::from_millis(interval_ms)).await
        }
        Commands::DefaultConfig => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// Wait until the appliance is present and identified
async fn wait_ready(device: &Device, events: &mut Events, timeout: Duration) -> Result<DeviceInfo> {
    let current = device.device_info();
    if current.is_ready() {
        return Ok(current);
    }

    next_event(events, timeout, |event| match event {
        DeviceEvent::InfoChanged(info) if info.is_ready() => Some(Ok(*info)),
        _ => None,
    })
    .await
    .context("Appliance not found")
}

async fn read_settings(device: &Device, events: &mut Events, timeout: Duration) -> Result<DeviceSettings> {
    device.request_settings()?;
    next_event(events, timeout, |event| match event {
        DeviceEvent::SettingsChanged(settings) => Some(Ok(*settings)),
        DeviceEvent::CommandFailed(failure)
            if matches!(
                failure.command,
                CommandFamily::RequestSettings | CommandFamily::SaveSettings
            ) =>
        {
            Some(Err(anyhow!(*failure)))
        }
        _ => None,
    })
    .await
}

/// Wait for the first event `pick` maps to a result
async fn next_event<T>(
    events: &mut Events,
    timeout: Duration,
    mut pick: impl FnMut(&DeviceEvent) -> Option<Result<T>>,
) -> Result<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                if let Some(result) = pick(&event) {
                    return result;
                }
            }
            Ok(None) => bail!("Event stream closed"),
            Err(_) => bail!("Timed out after {:?}", timeout),
        }
    }
}

/// Let queued writes drain, failing on any error reported for `family`
async fn settle(device: &Device, events: &mut Events, family: CommandFamily) -> Result<()> {
    while !device.pending_commands().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(SETTLE_TIME).await;

    while let Ok(event) = events.try_recv() {
        if let DeviceEvent::CommandFailed(failure) = event {
            if failure.command == family {
                return Err(failure.into());
            }
        }
    }
    info!("Done: {}", family);
    Ok(())
}

async fn monitor(device: &Device, events: &mut Events, count: Option<usize>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = device.request_io_status() {
                    bail!("Status poll rejected: {}", e);
                }
            }
            event = events.recv() => match event {
                Some(DeviceEvent::IoStatusChanged(status)) => {
                    let line = serde_json::to_string(&*status).context("Failed to serialize status")?;
                    println!("{}", line);
                    printed += 1;
                    if count.is_some_and(|limit| printed >= limit) {
                        return Ok(());
                    }
                }
                Some(DeviceEvent::CommandFailed(failure)) => warn!("{}", failure),
                Some(DeviceEvent::InfoChanged(info)) if !info.is_ready() => {
                    bail!("Appliance went away ({})", info.state);
                }
                Some(_) => {}
                None => bail!("Event stream closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}
