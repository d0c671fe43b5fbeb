//! fabricctl: installs forwarding intents on P4Runtime switches and polls
//! their tunnel counters.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use fabric_controller::{
    simulated_sessions, ControllerConfig, FabricController, LogSink, ObservationOutcome,
    ObservationSink, PlanStatus, TextSink,
};
use fabric_p4rt::{P4InfoResolver, SchemaResolver};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Where observation output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Plain text on stdout
    Text,
    /// Structured log events
    Log,
}

/// P4Runtime fabric controller
#[derive(Parser, Debug)]
#[command(name = "fabricctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology and intent file
    #[arg(short, long, default_value = "config/topology.yaml")]
    config: PathBuf,

    /// P4Info file, overriding the one named in the configuration
    #[arg(short, long)]
    p4info: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Observation interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Observation output format
    #[arg(long, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Stop after this many observation cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Run against in-process switches instead of real devices
    #[arg(long)]
    simulate: bool,

    /// Print the install plan and exit without touching any device
    #[arg(long)]
    plan_only: bool,
}

/// Installs the global subscriber. RUST_LOG overrides `log_level`.
fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer.compact()).try_init()
    };
    result.map_err(|e| anyhow!("failed to set logger: {e}"))
}

/// Cancels the returned token on SIGINT.
fn setup_signal_handlers() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    cancel
}

fn print_plan(controller: &FabricController) -> bool {
    let mut ok = true;
    for (index, result) in controller.plan().into_iter().enumerate() {
        match result {
            Ok(plan) => {
                println!("[{index}] {}", plan.label);
                for step in &plan.steps {
                    match controller.schema().decode_entry(&step.entry) {
                        Ok(entry) => println!("    {}: {entry}", step.device),
                        Err(e) => println!("    {}: {} ({e})", step.device, step.entry.table),
                    }
                }
            }
            Err(e) => {
                ok = false;
                println!("[{index}] rejected: {e}");
            }
        }
    }
    ok
}

async fn run(args: Args) -> Result<bool> {
    let mut config = ControllerConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(p4info) = args.p4info {
        config.p4info = p4info;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.observe.interval_ms = interval_ms;
    }

    let schema = P4InfoResolver::load(&config.p4info)
        .with_context(|| format!("failed to load P4Info {}", config.p4info.display()))?;
    let mut controller = FabricController::new(config, schema)?;
    if let Some(cycles) = args.cycles {
        controller = controller.with_max_cycles(cycles);
    }

    if args.plan_only {
        return Ok(print_plan(&controller));
    }
    if !args.simulate {
        bail!("no P4Runtime transport is available in this build, run with --simulate");
    }

    info!(
        devices = controller.topology().len(),
        intents = controller.config().intents.len(),
        "Starting fabricctl"
    );

    let cancel = setup_signal_handlers();
    let sessions = simulated_sessions(controller.topology());
    let mut sink: Box<dyn ObservationSink> = match args.output {
        Output::Text => Box::new(TextSink::new(std::io::stdout())),
        Output::Log => Box::new(LogSink),
    };
    let report = controller.run(&sessions, sink.as_mut(), &cancel).await;

    for failure in &report.composition {
        error!(index = failure.index, kind = %failure.kind, error = %failure.error, "Intent rejected");
    }
    for result in report.sync.failures() {
        if let PlanStatus::Failed { step, device, cause } = &result.status {
            error!(intent = %result.label, step, device = %device, error = %cause, "Intent not fully installed");
        }
    }
    match &report.observation {
        ObservationOutcome::Completed { cycles } => info!(cycles, "Shutdown complete"),
        ObservationOutcome::Cancelled => info!("Cancelled before observation"),
        ObservationOutcome::Aborted => error!("Observation skipped, a session was lost"),
        ObservationOutcome::Failed(e) => error!(error = %e, "Observation failed"),
    }

    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level, args.log_json) {
        eprintln!("fabricctl: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
