//! CLI entry point for bench-console
//!
//! Drives the bench instruments named in `config/bench.toml`:
//! - continuous readback of every connected instrument (`poll`)
//! - one-shot power supply, multimeter and electronic load commands
//! - serial microcontroller monitor, command and reset
//! - named register access on framed controllers
//!
//! # Usage
//!
//! ```bash
//! bench-console list
//! bench-console psu set 1 --volts 5 --amps 0.5
//! bench-console dmm continuity
//! bench-console load start --current 2.0
//! bench-console serial monitor mcu
//! bench-console poll
//! ```

use anyhow::{Context, Result};
use bench_console::capabilities::{LoadStartPlan, RegisterValue};
use bench_console::config::{BenchConfig, InstrumentKind, DEFAULT_CONFIG_PATH};
use bench_console::console::{ChannelSetting, PowerSupplyPanel};
use bench_console::drivers::register_device::BoilerController;
use bench_console::logging;
use bench_console::polling::{ModeSelector, PollEvent, PollingScheduler, ReadingBoard};
use bench_console::readings::{self, ContinuityReading, MeasureMode};
use bench_console::registry::InstrumentRegistry;
use bench_console::transport::serial;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const MONITOR_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "bench-console")]
#[command(about = "Bench-test console for lab instruments and microcontroller links", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured instruments
    List,

    /// List serial ports present on this machine
    Ports,

    /// Poll every connected instrument until Ctrl-C
    Poll {
        /// Initial multimeter mode
        #[arg(long)]
        mode: Option<MeasureMode>,
        /// Print one JSON object per poll instead of text
        #[arg(long)]
        json: bool,
    },

    /// Power supply commands
    Psu {
        /// Instrument id (first power supply when omitted)
        #[arg(long)]
        id: Option<String>,
        #[command(subcommand)]
        action: PsuAction,
    },

    /// Take one multimeter reading
    Dmm {
        /// Instrument id (first multimeter when omitted)
        #[arg(long)]
        id: Option<String>,
        /// voltage, current, resistance or continuity
        mode: MeasureMode,
    },

    /// Electronic load commands
    Load {
        /// Instrument id (first electronic load when omitted)
        #[arg(long)]
        id: Option<String>,
        #[command(subcommand)]
        action: LoadAction,
    },

    /// Serial microcontroller link commands
    Serial {
        #[command(subcommand)]
        action: SerialAction,
    },

    /// Named register access
    Register {
        /// Instrument id (first register device when omitted)
        #[arg(long)]
        id: Option<String>,
        #[command(subcommand)]
        action: RegisterAction,
    },

    /// Boiler controller manual outputs
    Boiler {
        /// Instrument id (first register device when omitted)
        #[arg(long)]
        id: Option<String>,
        /// manual, heater, dhw-pump, ch-pump or aux-pump
        output: String,
        /// true/false, on/off or an integer
        value: RegisterValue,
    },
}

#[derive(Subcommand)]
enum PsuAction {
    /// Print the identification string
    Identify,
    /// Write voltage and current set points of a channel
    Set {
        channel: u8,
        #[arg(long)]
        volts: f64,
        #[arg(long)]
        amps: f64,
    },
    /// Read back every channel
    Read,
    /// Switch a channel output
    Output {
        channel: u8,
        /// on or off
        state: String,
    },
}

#[derive(Subcommand)]
enum LoadAction {
    /// Run the start-up sequence
    Start {
        /// Override the configured static current
        #[arg(long)]
        current: Option<f64>,
    },
    /// Turn the load input off and release remote control
    Stop,
    /// Print input state and measurements
    Status,
}

#[derive(Subcommand)]
enum SerialAction {
    /// Print telemetry lines until Ctrl-C
    Monitor { id: String },
    /// Send one command line
    Send { id: String, text: String },
    /// Pulse the reset line
    Reset {
        id: String,
        /// Hold time, e.g. `100ms`
        #[arg(long, value_parser = humantime_duration)]
        hold: Option<Duration>,
    },
}

#[derive(Subcommand)]
enum RegisterAction {
    /// Print the device sign-on text
    Info,
    /// List register names
    Names,
    /// Read one register
    Read { name: String },
    /// Write one register
    Write { name: String, value: RegisterValue },
}

fn humantime_duration(text: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(text).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BenchConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    logging::init_from_config(&config)?;
    tracing::info!(application = %config.application.name, "Bench console starting");

    if let Commands::Ports = cli.command {
        for port in serial::list_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let registry = InstrumentRegistry::from_config(&config)?;
    let result = run(cli.command, &config, &registry).await;
    registry.disconnect_all().await;
    result
}

async fn run(command: Commands, config: &BenchConfig, registry: &InstrumentRegistry) -> Result<()> {
    match command {
        Commands::List => {
            for info in registry.list() {
                println!("{:<12} {:<16} {:<28} {}", info.id, info.kind, info.endpoint, info.name);
            }
            Ok(())
        }
        Commands::Ports => Ok(()),
        Commands::Poll { mode, json } => poll(config, registry, mode, json).await,
        Commands::Psu { id, action } => {
            let id = connect(registry, InstrumentKind::PowerSupply, id).await?;
            psu(registry, &id, action).await
        }
        Commands::Dmm { id, mode } => {
            let id = connect(registry, InstrumentKind::Multimeter, id).await?;
            let dmm = registry.multimeter(&id)?;
            let reading = readings::measure(dmm.as_ref(), mode).await?;
            if mode == MeasureMode::Continuity {
                println!("{}", ContinuityReading::classify(reading.value));
            } else {
                println!("{}", reading);
            }
            Ok(())
        }
        Commands::Load { id, action } => {
            let id = connect(registry, InstrumentKind::ElectronicLoad, id).await?;
            load(registry, &id, action).await
        }
        Commands::Serial { action } => serial_link(registry, action).await,
        Commands::Register { id, action } => {
            let id = connect(registry, InstrumentKind::RegisterDevice, id).await?;
            let device = registry.register_device(&id)?;
            match action {
                RegisterAction::Info => println!("{}", device.device_info().await?),
                RegisterAction::Names => {
                    for name in device.register_names() {
                        println!("{}", name);
                    }
                }
                RegisterAction::Read { name } => {
                    println!("{} = {}", name, device.read_named_value(&name).await?)
                }
                RegisterAction::Write { name, value } => {
                    device.write_named_value(&name, value).await?
                }
            }
            Ok(())
        }
        Commands::Boiler { id, output, value } => {
            let id = connect(registry, InstrumentKind::RegisterDevice, id).await?;
            let boiler = BoilerController::new(registry.register_device(&id)?);
            match output.as_str() {
                "manual" => boiler.manual_mode(value).await?,
                "heater" => boiler.activate_heater(value).await?,
                "dhw-pump" => boiler.activate_dhw_pump(value).await?,
                "ch-pump" => boiler.activate_ch_pump(value).await?,
                "aux-pump" => boiler.activate_aux_pump(value).await?,
                other => anyhow::bail!("Unknown boiler output '{}'", other),
            }
            Ok(())
        }
    }
}

/// Resolve the target id and open its session.
async fn connect(
    registry: &InstrumentRegistry,
    kind: InstrumentKind,
    id: Option<String>,
) -> Result<String> {
    let id = match id {
        Some(id) => id,
        None => registry
            .first_of(kind)
            .map(|entry| entry.id.clone())
            .with_context(|| format!("No enabled {} in configuration", kind))?,
    };
    registry
        .connect(&id)
        .await
        .with_context(|| format!("Failed to connect to '{}'", id))?;
    Ok(id)
}

async fn psu(registry: &InstrumentRegistry, id: &str, action: PsuAction) -> Result<()> {
    let panel = PowerSupplyPanel::new(registry.power_supply(id)?);
    match action {
        PsuAction::Identify => println!("{}", panel.power_supply().identify().await?),
        PsuAction::Set { channel, volts, amps } => {
            panel
                .apply_settings(&[ChannelSetting { channel, volts, amps }])
                .await?;
            println!("{}", panel.status());
        }
        PsuAction::Read => {
            for values in panel.read_values().await? {
                println!(
                    "CH{}: {:.3} V  {:.3} A",
                    values.channel, values.volts, values.amps
                );
            }
        }
        PsuAction::Output { channel, state } => {
            let psu = panel.power_supply();
            match state.to_ascii_lowercase().as_str() {
                "on" | "1" | "true" => psu.output_on(channel).await?,
                "off" | "0" | "false" => psu.output_off(channel).await?,
                other => anyhow::bail!("Output state must be on or off, got '{}'", other),
            }
        }
    }
    Ok(())
}

async fn load(registry: &InstrumentRegistry, id: &str, action: LoadAction) -> Result<()> {
    let load = registry.electronic_load(id)?;
    match action {
        LoadAction::Start { current } => {
            let mut plan = registry
                .get(id)?
                .load_plan
                .clone()
                .unwrap_or_else(LoadStartPlan::default);
            if let Some(amps) = current {
                plan.static_current = amps;
            }
            load.start_sequence(&plan).await?;
            println!("Load on: CH{} {} {:.3} A", plan.channel, plan.mode, plan.static_current);
        }
        LoadAction::Stop => {
            load.load_off().await?;
            load.remote_off().await?;
        }
        LoadAction::Status => {
            let on = load.check_load_status().await?;
            println!("Input: {}", if on { "ON" } else { "OFF" });
            println!("Voltage: {:.3} V", load.measure_voltage().await?);
            println!("Current: {:.3} A", load.measure_current().await?);
        }
    }
    Ok(())
}

async fn serial_link(registry: &InstrumentRegistry, action: SerialAction) -> Result<()> {
    let id = match &action {
        SerialAction::Monitor { id } | SerialAction::Send { id, .. } | SerialAction::Reset { id, .. } => {
            id.clone()
        }
    };
    registry
        .connect(&id)
        .await
        .with_context(|| format!("Failed to open serial link '{}'", id))?;
    let link = registry.serial_link(&id)?;

    match action {
        SerialAction::Monitor { .. } => {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let open = link.is_connected();
                        for line in link.drain_lines() {
                            println!("{}", line);
                        }
                        if !open {
                            anyhow::bail!("Serial link '{}' closed", id);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        SerialAction::Send { text, .. } => link.send(&text)?,
        SerialAction::Reset { hold, .. } => {
            let hold = hold.unwrap_or(registry.get(&id)?.reset_pulse);
            link.reset_pulse(hold).await?;
        }
    }
    Ok(())
}

async fn poll(
    config: &BenchConfig,
    registry: &InstrumentRegistry,
    mode: Option<MeasureMode>,
    json: bool,
) -> Result<()> {
    for info in registry.list() {
        if matches!(info.kind, InstrumentKind::SerialLink | InstrumentKind::RegisterDevice) {
            continue;
        }
        if let Err(err) = registry.connect(&info.id).await {
            tracing::warn!(instrument = %info.id, error = %err, "Instrument unavailable");
        }
    }

    let selector = ModeSelector::new(mode.unwrap_or(config.polling.multimeter_mode));
    let board = ReadingBoard::new();
    let mut scheduler = PollingScheduler::new(board.clone());
    for source in registry.poll_sources(&config.polling, &selector) {
        scheduler.add(source);
    }
    let mut events = scheduler.subscribe();
    let poller = scheduler.spawn();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) if json => {
                    if let Some(snapshot) = board.latest(event.instrument()) {
                        println!("{}", serde_json::to_string(&snapshot)?);
                    }
                }
                Some(PollEvent::Readings { instrument, readings }) => {
                    let text: Vec<String> = readings.iter().map(ToString::to_string).collect();
                    println!("[{}] {}", instrument, text.join(", "));
                }
                Some(PollEvent::Failed { instrument, message }) => {
                    println!("[{}] error: {}", instrument, message);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.stop().await;
    Ok(())
}
