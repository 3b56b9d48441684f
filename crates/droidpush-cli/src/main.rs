//! droidpush - install packages onto network-attached devices over adb
//!
//! Usage:
//!   droidpush install app.apk -p com.example.app -d 192.168.1.20
//!   droidpush uninstall -p com.example.app -d 192.168.1.20
//!   droidpush connect -d 192.168.1.20
//!   droidpush devices

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use droidpush_core::bridge::{BridgeClient, DeviceEntry};
use droidpush_core::config::{ConfigOverrides, ConfigStore, DroidpushConfig};
use droidpush_core::device::{Device, DeviceAddress};
use droidpush_core::error::{
    AddressError, BridgeError, FailureKind, InstallError, ReconcileError,
};
use droidpush_core::install::{InstallOrchestrator, InstallTransaction};
use droidpush_core::reconcile::{ConnectionReconciler, ReconcileReport};

/// Exit code for usage and configuration errors.
const USAGE_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(name = "droidpush")]
#[command(about = "Install packages onto network-attached devices over adb", long_about = None)]
struct Cli {
    /// Path to droidpush.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// adb executable to use
    #[arg(long, global = true)]
    adb: Option<PathBuf>,

    /// Wait bound for each bridge command, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Uninstall the previous version, install the apk and verify it
    Install(InstallArgs),

    /// Remove a package from a device
    #[command(alias = "rm")]
    Uninstall {
        /// Device address (ddd.ddd.ddd.ddd[:port])
        #[arg(short, long)]
        device: String,
        /// Package id to remove
        #[arg(short, long)]
        package: String,
        /// Reconciliation cycles before giving up on the connection
        #[arg(long)]
        max_cycles: Option<u32>,
    },

    /// Bring a device connection into a connected state
    Connect {
        /// Device address (ddd.ddd.ddd.ddd[:port])
        #[arg(short, long)]
        device: String,
        /// Reconciliation cycles before giving up
        #[arg(long)]
        max_cycles: Option<u32>,
    },

    /// Disconnect one device, or all devices
    Disconnect {
        /// Device address; omit to disconnect everything
        #[arg(short, long)]
        device: Option<String>,
    },

    /// List devices known to the bridge
    Devices,
}

#[derive(Args)]
struct InstallArgs {
    /// Path to the apk to install
    apk: PathBuf,
    /// Package id the apk installs as
    #[arg(short, long)]
    package: String,
    /// Target device address; repeat for several devices
    #[arg(short = 'd', long = "device", required = true, value_name = "ADDRESS")]
    devices: Vec<String>,
    /// Reconciliation cycles before giving up on a connection
    #[arg(long)]
    max_cycles: Option<u32>,
    /// Wait bound for the install command, in seconds
    #[arg(long, value_name = "SECS")]
    install_timeout: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
    /// Print nothing; rely on the exit code
    Quiet,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let default_filter = if cli.verbose {
        "droidpush=debug,droidpush_core=debug,info"
    } else {
        "droidpush=info,droidpush_core=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling in-flight bridge commands");
            interrupt.cancel();
        }
    });

    match run_cli(cli, cancel).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run_cli(cli: Cli, cancel: CancellationToken) -> Result<ExitCode> {
    let overrides = ConfigOverrides {
        adb_path: cli.adb.clone(),
        command_timeout_secs: cli.timeout,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Install(args) => {
            run_install(cli.config, overrides, args, cli.format, cancel).await
        }
        Commands::Uninstall {
            device,
            package,
            max_cycles,
        } => {
            let device = Device::new(&device)?;
            let config = load_config(
                cli.config,
                ConfigOverrides {
                    max_cycles,
                    ..overrides
                },
            )?;
            let bridge = build_bridge(&config, cancel)?;
            run_uninstall(bridge, &config, device, &package, cli.format).await
        }
        Commands::Connect { device, max_cycles } => {
            let device = Device::new(&device)?;
            let config = load_config(
                cli.config,
                ConfigOverrides {
                    max_cycles,
                    ..overrides
                },
            )?;
            let bridge = build_bridge(&config, cancel)?;
            run_connect(bridge, &config, device, cli.format).await
        }
        Commands::Disconnect { device } => {
            let address = device.as_deref().map(DeviceAddress::parse).transpose()?;
            let config = load_config(cli.config, overrides)?;
            let bridge = build_bridge(&config, cancel)?;
            bridge.disconnect(address.as_ref()).await?;
            print_disconnect_result(address.as_ref(), cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Devices => {
            let config = load_config(cli.config, overrides)?;
            let bridge = build_bridge(&config, cancel)?;
            let entries = bridge.list_devices().await?;
            print_devices(&entries, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<DroidpushConfig> {
    let store = ConfigStore::resolve(path)?;
    store
        .load()?
        .with_overrides(overrides)
        .with_context(|| format!("Invalid configuration: {}", store.config_path().display()))
}

fn build_bridge(
    config: &DroidpushConfig,
    cancel: CancellationToken,
) -> Result<Arc<dyn BridgeClient>> {
    Ok(Arc::new(config.bridge(cancel)?))
}

async fn run_install(
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
    args: InstallArgs,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    // Reject every address before touching the bridge.
    let devices = args
        .devices
        .iter()
        .map(|address| Device::new(address))
        .collect::<Result<Vec<_>, AddressError>>()?;

    let config = load_config(
        config_path,
        ConfigOverrides {
            max_cycles: args.max_cycles,
            install_timeout_secs: args.install_timeout,
            ..overrides
        },
    )?;
    let bridge = build_bridge(&config, cancel.clone())?;

    let mut handles = Vec::with_capacity(devices.len());
    for device in devices {
        let reconciler =
            ConnectionReconciler::new(bridge.clone()).with_max_cycles(config.max_cycles);
        let orchestrator = InstallOrchestrator::new(bridge.clone(), reconciler)
            .with_cancellation(cancel.clone());
        let transaction = InstallTransaction::new(&args.package, &args.apk, device);
        handles.push(tokio::spawn(async move {
            orchestrator.full_install(transaction).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.context("Install task failed")?);
    }

    print_install_results(&results, format)?;

    let code = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .map_or(0, |err| err.kind().exit_code());
    Ok(ExitCode::from(code))
}

async fn run_uninstall(
    bridge: Arc<dyn BridgeClient>,
    config: &DroidpushConfig,
    mut device: Device,
    package: &str,
    format: OutputFormat,
) -> Result<ExitCode> {
    ConnectionReconciler::new(bridge.clone())
        .with_max_cycles(config.max_cycles)
        .ensure_connected(&mut device)
        .await?;
    let removed = bridge.uninstall(package, Some(device.address())).await?;

    match format {
        OutputFormat::Table => {
            if removed {
                println!("✓ Uninstalled '{}' from {}", package, device.address());
            } else {
                println!("• '{}' is not installed on {}", package, device.address());
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "device": device.address(),
                "package": package,
                "removed": removed,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_connect(
    bridge: Arc<dyn BridgeClient>,
    config: &DroidpushConfig,
    mut device: Device,
    format: OutputFormat,
) -> Result<ExitCode> {
    let report = ConnectionReconciler::new(bridge)
        .with_max_cycles(config.max_cycles)
        .ensure_connected(&mut device)
        .await?;
    print_connect_result(&device, &report, format)?;
    Ok(ExitCode::SUCCESS)
}

fn print_connect_result(
    device: &Device,
    report: &ReconcileReport,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!(
                "✓ {} is {} ({} cycle{})",
                device.address(),
                device.state(),
                report.cycles,
                if report.cycles == 1 { "" } else { "s" }
            );
            for step in &report.escalations {
                println!("  ↻ {:?}", step);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "device": device,
                "cycles": report.cycles,
                "escalations": report.escalations,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn print_disconnect_result(address: Option<&DeviceAddress>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => match address {
            Some(address) => println!("✓ Disconnected {address}"),
            None => println!("✓ Disconnected all devices"),
        },
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&disconnect_json(address))?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

/// `null` when every device was disconnected.
fn disconnect_json(address: Option<&DeviceAddress>) -> serde_json::Value {
    serde_json::json!({ "disconnected": address })
}

fn print_devices(entries: &[DeviceEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("No devices attached");
                return Ok(());
            }
            println!("{:<24} STATE", "ADDRESS");
            for entry in entries {
                println!("{:<24} {}", entry.address, entry.state());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(entries)?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn print_install_results(
    results: &[Result<InstallTransaction, InstallError>],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            for result in results {
                match result {
                    Ok(tx) => println!(
                        "✓ {:<21} {} {}",
                        tx.device().address(),
                        tx.package_id(),
                        tx.phase()
                    ),
                    Err(err) => print_install_failure(err),
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = results
                .iter()
                .map(|result| match result {
                    Ok(tx) => serde_json::json!({ "ok": true, "transaction": tx }),
                    Err(err) => serde_json::json!({
                        "ok": false,
                        "kind": err.kind(),
                        "exit_code": err.kind().exit_code(),
                        "transaction": err.transaction,
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn print_install_failure(err: &InstallError) {
    let tx = &err.transaction;
    println!(
        "✗ {:<21} {} failed after {} [{}]",
        tx.device().address(),
        tx.package_id(),
        err.reached(),
        err.kind()
    );
    println!("  {}", err.reason);
    if let Some(output) = err.reason.output() {
        println!("  exit status: {}", output.exit_code);
        for (label, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                println!("  {label}: {line}");
            }
        }
    }
}

/// Map an error to the process exit code of its failure kind.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    failure_kind(err).map_or(USAGE_EXIT_CODE, FailureKind::exit_code)
}

fn failure_kind(err: &anyhow::Error) -> Option<FailureKind> {
    err.chain().find_map(|cause| {
        if cause.downcast_ref::<AddressError>().is_some() {
            Some(FailureKind::InvalidAddress)
        } else if let Some(err) = cause.downcast_ref::<BridgeError>() {
            Some(err.kind())
        } else if let Some(err) = cause.downcast_ref::<ReconcileError>() {
            Some(err.kind())
        } else {
            cause.downcast_ref::<InstallError>().map(InstallError::kind)
        }
    })
}
