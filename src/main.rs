use anyhow::{Context, Result, bail};
use axpert_rs::rated::{AcInputRange, BatteryType, ChargerSourcePriority, OutputSourcePriority};
use axpert_rs::warnings::model_name;
use axpert_rs::{Inverter, InverterConfig, InverterError, TransportConfig};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use serde::Serialize;
use std::fmt::Display;
use std::fs::File;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::{signal, time::sleep};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Query and configure a Voltronic/Axpert inverter.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device node, `usb`, or `usb:VVVV:PPPP` for direct USB access.
    #[arg(short, long, default_value = "/dev/hidraw0")]
    device: TransportConfig,
    /// Overall deadline for each operation, including retries.
    #[arg(long, default_value_t = 30)]
    deadline_secs: u64,
    /// Print results as JSON.
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Live status (QPIGS)
    Status,
    /// Ratings and current settings (QPIRI)
    Rated,
    /// Active warnings (QPIWS)
    Warnings,
    /// Operating mode (QMOD)
    Mode,
    /// Serial number, firmware and model
    Info,
    /// Send an arbitrary command and print the decoded reply
    Raw { command: String },
    /// Poll live status until Ctrl+C
    Monitor {
        #[arg(short, long, default_value_t = 10)]
        interval_secs: u64,
    },
    /// Change a setting
    Set {
        #[command(subcommand)]
        setting: Setting,
    },
}

#[derive(Subcommand, Debug)]
enum Setting {
    /// POPnn
    OutputPriority {
        #[arg(value_enum)]
        value: OutputSourcePriority,
    },
    /// PCPnn
    ChargerPriority {
        #[arg(value_enum)]
        value: ChargerSourcePriority,
    },
    /// PBTnn
    BatteryType {
        #[arg(value_enum)]
        value: BatteryType,
    },
    /// PGRnn
    AcInputRange {
        #[arg(value_enum)]
        value: AcInputRange,
    },
    /// MCHGCnnn, in amps
    MaxChargingCurrent { amps: u16 },
    /// MUCHGCnnn, in amps
    MaxUtilityChargingCurrent { amps: u16 },
    /// PSDVnn.n, in volts
    CutoffVoltage { volts: f32 },
    /// PCVVnn.n, in volts
    BulkVoltage { volts: f32 },
    /// PBFTnn.n, in volts
    FloatVoltage { volts: f32 },
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v (frames in hex), TRACE with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down gracefully.");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    info!("Using inverter at {}", cli.device);
    let inverter = Inverter::with_config(InverterConfig::new(cli.device));
    let deadline = Duration::from_secs(cli.deadline_secs);
    let out = Output { json: cli.json };

    match cli.command {
        Cmd::Status => match within(deadline, inverter.get_general_status()).await? {
            Some(status) => out.record(&status)?,
            None => bail!("Inverter returned an undecodable status payload"),
        },
        Cmd::Rated => match within(deadline, inverter.get_rated_information()).await? {
            Some(rated) => out.record(&rated)?,
            None => bail!("Inverter returned an undecodable rated information payload"),
        },
        Cmd::Warnings => {
            let warnings = within(deadline, async { Ok::<_, InverterError>(inverter.get_warnings().await) }).await?;
            if warnings.is_empty() {
                warn!("Warning flags unavailable");
            }
            out.record(&warnings)?;
        }
        Cmd::Mode => {
            let mode = within(deadline, inverter.get_mode()).await?;
            out.record(&mode)?;
        }
        Cmd::Info => {
            let info = within(deadline, async {
                let model_id = inverter.get_model_id().await;
                Ok::<_, InverterError>(Identity {
                    serial_number: inverter.get_device_id().await?,
                    firmware_version: inverter.get_firmware_version().await?,
                    model_name: model_name(&model_id).unwrap_or("Unknown").to_string(),
                    model_id,
                })
            })
            .await?;
            out.record(&info)?;
        }
        Cmd::Raw { command } => {
            let reply = within(deadline, inverter.send_command(&command)).await?;
            out.record(&reply)?;
        }
        Cmd::Monitor { interval_secs } => monitor(&inverter, deadline, out, interval_secs).await,
        Cmd::Set { setting } => {
            let accepted = within(deadline, apply(&inverter, setting)).await?;
            if !accepted {
                bail!("Inverter did not acknowledge the setting");
            }
            info!("Setting acknowledged");
        }
    }

    Ok(())
}

/// Run one library operation under the overall deadline.
async fn within<T>(deadline: Duration, operation: impl Future<Output = Result<T, InverterError>>) -> Result<T> {
    let result = tokio::time::timeout(deadline, operation)
        .await
        .map_err(InverterError::from)
        .context("Inverter did not finish in time")?;
    Ok(result?)
}

async fn apply(inverter: &Inverter, setting: Setting) -> Result<bool, InverterError> {
    match setting {
        Setting::OutputPriority { value } => inverter.set_output_source_priority(value).await,
        Setting::ChargerPriority { value } => inverter.set_charger_source_priority(value).await,
        Setting::BatteryType { value } => inverter.set_battery_type(value).await,
        Setting::AcInputRange { value } => inverter.set_ac_input_range(value).await,
        Setting::MaxChargingCurrent { amps } => inverter.set_max_charging_current(amps).await,
        Setting::MaxUtilityChargingCurrent { amps } => inverter.set_max_utility_charging_current(amps).await,
        Setting::CutoffVoltage { volts } => inverter.set_battery_cutoff_voltage(volts).await,
        Setting::BulkVoltage { volts } => inverter.set_battery_bulk_voltage(volts).await,
        Setting::FloatVoltage { volts } => inverter.set_battery_float_voltage(volts).await,
    }
}

async fn monitor(inverter: &Inverter, deadline: Duration, out: Output, interval_secs: u64) {
    let interval = Duration::from_secs(interval_secs.max(1));
    info!("Polling every {:?}, Ctrl+C to stop", interval);

    loop {
        match within(deadline, inverter.get_general_status()).await {
            Ok(Some(status)) => {
                if let Err(e) = out.record(&status) {
                    error!("Failed to print status: {:#}", e);
                }
            }
            Ok(None) => warn!("Skipping undecodable status payload"),
            Err(e) => warn!("Poll failed: {:#}", e),
        }
        sleep(interval).await;
    }
}

#[derive(Debug, Serialize)]
struct Identity {
    serial_number: String,
    firmware_version: String,
    model_id: String,
    model_name: String,
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Serial number:    {}", self.serial_number)?;
        writeln!(f, "Firmware version: {}", self.firmware_version)?;
        write!(f, "Model:            {} ({})", self.model_name, self.model_id)
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn record<T: Serialize + Display>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value).context("Failed to encode JSON")?);
        } else {
            println!("{}", value);
        }
        Ok(())
    }
}
