use crate::engine::UeSupervisor;
use crate::model::{FleetConfig, HoldRange, LifecyclePolicy, SimulatorConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How long to wait for buffered output to flush once the fleet has stopped.
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Output line routing for stdout/stderr writer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
pub(crate) fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ue-fleet",
    version,
    about = "Keep a fleet of simulated UEs joining and leaving a 5G core"
)]
pub struct Cli {
    /// UE simulator binary, started as `<simulator> -c <config>`
    #[arg(long, default_value = "build/nr-ue")]
    pub simulator: std::path::PathBuf,

    /// Control CLI used to deregister a running UE
    #[arg(long, default_value = "build/nr-cli")]
    pub control_cli: std::path::PathBuf,

    /// Directory holding the per-subscriber UE config files
    #[arg(long, default_value = "config/customConfigs")]
    pub config_dir: std::path::PathBuf,

    /// Config file name; `{index}` and `{imsi}` are substituted per subscriber
    #[arg(long, default_value = "free5gc-ue{index}.yaml")]
    pub config_template: String,

    /// Run the simulator through sudo
    #[arg(long)]
    pub sudo: bool,

    /// IMSI prefix; each subscriber appends a 3-digit ordinal starting at 001
    #[arg(long, default_value = "208930000000")]
    pub imsi_prefix: String,

    /// Number of subscribers to run
    #[arg(long, default_value_t = 3)]
    pub subscribers: u32,

    /// Delay between successive subscriber launches
    #[arg(long, default_value = "8s")]
    pub stagger: humantime::Duration,

    /// Shortest time a UE stays registered
    #[arg(long, default_value = "1500s")]
    pub connected_min: humantime::Duration,

    /// Longest time a UE stays registered
    #[arg(long, default_value = "9999s")]
    pub connected_max: humantime::Duration,

    /// Shortest time a UE stays detached before re-registering
    #[arg(long, default_value = "500s")]
    pub disconnected_min: humantime::Duration,

    /// Longest time a UE stays detached before re-registering
    #[arg(long, default_value = "4000s")]
    pub disconnected_max: humantime::Duration,

    /// Base delay before retrying a failed start (doubles per consecutive failure, up to 8x)
    #[arg(long, default_value = "10s")]
    pub retry_backoff: humantime::Duration,

    /// Consecutive start failures tolerated before a subscriber gives up
    #[arg(long, default_value_t = 5)]
    pub max_failures: u32,

    /// Stop each subscriber after this many join/leave cycles (default: run until interrupted)
    #[arg(long)]
    pub cycles: Option<u32>,

    /// Instruction passed to the control CLI to detach a UE
    #[arg(long, default_value = "deregister switch-off")]
    pub deregister_instruction: String,

    /// Timeout for the deregistration command
    #[arg(long, default_value = "10s")]
    pub control_timeout: humantime::Duration,

    /// Time a UE gets to exit after SIGTERM before it is killed
    #[arg(long, default_value = "2s")]
    pub grace_period: humantime::Duration,

    /// Time each subscriber gets to wind down after an interrupt
    #[arg(long, default_value = "15s")]
    pub shutdown_timeout: humantime::Duration,

    /// Print the fleet report as JSON on exit
    #[arg(long)]
    pub json: bool,

    /// Export the fleet report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Build a `FleetConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> FleetConfig {
    FleetConfig {
        imsi_prefix: args.imsi_prefix.clone(),
        subscribers: args.subscribers,
        stagger: Duration::from(args.stagger),
        shutdown_timeout: Duration::from(args.shutdown_timeout),
        simulator: SimulatorConfig {
            simulator: args.simulator.clone(),
            control_cli: args.control_cli.clone(),
            config_dir: args.config_dir.clone(),
            config_template: args.config_template.clone(),
            use_sudo: args.sudo,
            deregister_instruction: args.deregister_instruction.clone(),
            control_timeout: Duration::from(args.control_timeout),
            grace_period: Duration::from(args.grace_period),
        },
        lifecycle: LifecyclePolicy {
            connected_hold: HoldRange::new(
                Duration::from(args.connected_min),
                Duration::from(args.connected_max),
            ),
            disconnected_hold: HoldRange::new(
                Duration::from(args.disconnected_min),
                Duration::from(args.disconnected_max),
            ),
            retry_backoff: Duration::from(args.retry_backoff),
            max_consecutive_failures: args.max_failures,
            max_cycles: args.cycles,
        },
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    crate::orchestrator::check_setup(&cfg).context("fleet setup failed")?;

    let (out_tx, out_handle) = spawn_output_writer();
    let supervisor = Arc::new(UeSupervisor::new(cfg.simulator.clone(), out_tx.clone()));

    info!(
        subscribers = cfg.subscribers,
        stagger = %args.stagger,
        "starting UE fleet"
    );
    let report =
        crate::orchestrator::run_fleet(&cfg, supervisor, crate::orchestrator::interrupted()).await;

    let processed = crate::orchestrator::process_fleet_report(&args, &report);
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }

    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&report).lines {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    // Subscribers that missed the shutdown timeout may still hold writer senders.
    drop(out_tx);
    if tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, out_handle)
        .await
        .is_err()
    {
        warn!("output writer still busy, exiting anyway");
    }
    Ok(())
}
