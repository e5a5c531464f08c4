use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use braille_coordinator_lib::monitor::{WordMonitor, DEFAULT_WIRE_LOG_CAPACITY};
use braille_coordinator_lib::serial::{available_ports, Connector, NativeConnector};
use braille_coordinator_lib::sim::{SimulatedConnector, SimulatedDevice};
use braille_coordinator_lib::{CancelToken, Coordinator, CoordinatorConfig};

#[derive(Parser)]
#[command(name = "braille-coordinator")]
#[command(about = "Drive chains of serial Braille modules")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port to use instead of the configured ones (repeatable)
    #[arg(short, long = "port")]
    ports: Vec<String>,

    /// Talk to in-memory simulated controllers instead of real ports
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Display text across all live modules
    Write { text: Vec<String> },
    /// Display the contents of a text file
    WriteFile { path: PathBuf },
    /// Run the self test on every live device
    Test,
    /// Lower every module on every live device
    Reset,
    /// Show per-device connection state
    Status,
    /// Ask every configured device for STATUS
    Health,
    /// Raise a raw six-dot pattern (0-63) on one device
    Pattern { device: usize, value: u8 },
    /// Print how long a text would take without connecting
    Estimate { text: Vec<String> },
    /// List serial ports found on this machine
    Ports,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    if !args.ports.is_empty() {
        config = config.with_ports(args.ports.iter().cloned());
    }
    config.validate()?;
    Ok(config)
}

fn connector_for(config: &CoordinatorConfig, simulate: bool) -> Arc<dyn Connector> {
    if !simulate {
        return Arc::new(NativeConnector);
    }
    log::info!("Using {} simulated device(s)", config.endpoints.len());
    let connector = config
        .endpoints
        .iter()
        .fold(SimulatedConnector::new(), |sim, endpoint| {
            sim.with_device(
                endpoint.address.clone(),
                SimulatedDevice {
                    modules: config.modules_per_device,
                    ..SimulatedDevice::default()
                },
            )
        });
    Arc::new(connector)
}

async fn write(coordinator: &Coordinator, text: &str) -> Result<()> {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current character");
            on_interrupt.cancel();
        }
    });

    let monitor = WordMonitor::spawn(
        coordinator.subscribe_progress(),
        coordinator.subscribe_wire(),
        DEFAULT_WIRE_LOG_CAPACITY,
    );
    let outcome = coordinator.write_text_cancellable(text, &cancel).await;
    interrupt.abort();
    let words = monitor.stop().await;

    // leave every module lowered, even after a cancelled or refused job
    coordinator.reset_all().await;

    let result = outcome?;
    print_json(&json!({
        "result": result,
        "words": words.words.iter().map(|w| w.word.as_str()).collect::<Vec<_>>(),
    }))
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    match &args.command {
        Command::Ports => return print_json(&available_ports()?),
        Command::Estimate { text } => {
            let coordinator = Coordinator::new(config);
            let text = text.join(" ");
            let estimate = coordinator.estimate_duration(&text);
            return print_json(&json!({
                "characters": text.chars().count(),
                "estimated_ms": estimate.as_millis() as u64,
            }));
        }
        _ => {}
    }

    let connector = connector_for(&config, args.simulate);
    let coordinator = Coordinator::with_connector(config, connector);

    let reports = coordinator.connect().await;
    for report in reports.iter().filter(|r| !r.connected) {
        log::warn!(
            "Device {} ({}) unavailable: {}",
            report.index,
            report.address,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    let outcome = match args.command {
        Command::Write { text } => write(&coordinator, &text.join(" ")).await,
        Command::WriteFile { path } => match std::fs::read_to_string(&path) {
            Ok(text) => write(&coordinator, &text).await,
            Err(e) => {
                Err(anyhow::Error::new(e).context(format!("failed to read {}", path.display())))
            }
        },
        Command::Test => print_json(&coordinator.test_all_modules().await),
        Command::Reset => print_json(&coordinator.reset_all().await),
        Command::Status => print_json(&coordinator.status().await),
        Command::Health => print_json(&coordinator.check_health().await),
        Command::Pattern { device, value } => match coordinator.send_pattern(device, value).await {
            Ok(accepted) => print_json(&json!({
                "device": device,
                "pattern": value,
                "accepted": accepted,
            })),
            Err(e) => Err(e.into()),
        },
        Command::Ports | Command::Estimate { .. } => Ok(()),
    };

    coordinator.disconnect().await;
    outcome
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
