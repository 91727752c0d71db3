//! `toolgate` entry point.
//!
//! Execution-resilience hooks for a coding agent's tool pipeline. Each hook
//! subcommand is one activation: read a JSON event from stdin (bounded
//! wait), consult one persisted store, print advisory lines on stdout, and
//! exit. Diagnostics go to stderr via `tracing` so stdout stays parseable.
//!
//! ## Commands
//!
//! - `toolgate circuit`    — per-tool failure isolation (the only blocker)
//! - `toolgate throttle`   — call-rate advisories over nested windows
//! - `toolgate checkpoint` — create/recover task checkpoints
//! - `toolgate status`     — read-only dashboard of all three stores
//!
//! ## Exit Codes
//!
//! - 0: allow / advisory only — including every internal failure (fail open)
//! - 2: block (circuit OPEN and still inside its timeout)
//!
//! The governor must never stall or fail a tool call through its own
//! malfunction: event-read timeouts degrade to an empty event, and any store
//! error degrades to an allow with a warning on stderr.

use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use toolgate_core::CheckpointStore;
use toolgate_core::CircuitStore;
use toolgate_core::GovernorConfig;
use toolgate_core::StateDir;
use toolgate_core::ThrottleStore;
use toolgate_core::throttle;
use toolgate_protocol::ToolInvocationEvent;
use toolgate_protocol::Verdict;

/// Execution resilience governor — hook commands for the tool pipeline.
#[derive(Debug, Parser)]
#[command(name = "toolgate", version)]
struct Cli {
    /// Project directory (defaults to TOOLGATE_PROJECT_DIR, then the current
    /// directory)
    #[arg(short = 'C', long = "cwd", value_name = "DIR", global = true)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Track tool failures; block calls while a circuit is open
    Circuit,
    /// Advise on call-rate pressure across the burst/medium/long windows
    Throttle,
    /// Create or recover task checkpoints
    Checkpoint,
    /// Print per-tool circuit state, window occupancy, and the latest
    /// checkpoint
    Status {
        /// Output as JSON instead of text
        #[arg(long = "json", short = 'j')]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let state = StateDir::resolve(cli.cwd.as_deref());
    let config = GovernorConfig::load(state.config_dir());

    match cli.command {
        Command::Status { json } => match print_status(&state, &config, json) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("status failed: {e:#}");
                ExitCode::FAILURE
            }
        },
        command => {
            let verdict = run_hook(command, &state, &config);
            for line in &verdict.advisories {
                println!("{line}");
            }
            ExitCode::from(verdict.decision.exit_code())
        }
    }
}

/// One hook activation, end to end. Infallible by contract: every internal
/// error is converted to an allow here, at the boundary.
fn run_hook(command: Command, state: &StateDir, config: &GovernorConfig) -> Verdict {
    let event = read_event(config.ingest.stdin_timeout_ms);
    let now = chrono::Utc::now();

    match command {
        Command::Circuit => fail_open(
            CircuitStore::new(state, config.circuit.clone()).evaluate(
                event.tool(),
                event.succeeded(),
                now,
            ),
            "circuit",
        ),
        Command::Throttle => fail_open(
            ThrottleStore::new(state, config.throttle.clone()).evaluate(
                event.tool(),
                event.succeeded(),
                now,
            ),
            "throttle",
        ),
        Command::Checkpoint => fail_open(CheckpointStore::new(state).apply(&event, now), "checkpoint"),
        Command::Status { .. } => unreachable!("status is handled in main"),
    }
}

/// Read one JSON event from stdin, waiting at most `timeout_ms`.
///
/// Late, absent, or malformed payloads all degrade to the default event so
/// the pipeline is never held hostage by its governor.
fn read_event(timeout_ms: u64) -> ToolInvocationEvent {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::warn!("no runtime for stdin read, proceeding with defaults: {e}");
            return ToolInvocationEvent::default();
        }
    };

    let mut raw = String::new();
    let read = runtime.block_on(async {
        tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            tokio::io::stdin().read_to_string(&mut raw),
        )
        .await
    });

    match read {
        Ok(Ok(_)) => match ToolInvocationEvent::from_json(raw.trim()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("malformed hook payload, proceeding with defaults: {e}");
                ToolInvocationEvent::default()
            }
        },
        Ok(Err(e)) => {
            tracing::warn!("unreadable hook payload, proceeding with defaults: {e}");
            ToolInvocationEvent::default()
        }
        Err(_) => {
            tracing::warn!("no hook payload within {timeout_ms}ms, proceeding with defaults");
            ToolInvocationEvent::default()
        }
    }
}

/// The fail-open boundary: a store error yields a neutral allow, never a
/// propagated failure.
fn fail_open(result: toolgate_core::Result<Verdict>, store: &str) -> Verdict {
    match result {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!("{store} store unavailable, failing open: {e}");
            Verdict::allow()
        }
    }
}

fn print_status(state: &StateDir, config: &GovernorConfig, json: bool) -> anyhow::Result<()> {
    let circuits = CircuitStore::new(state, config.circuit.clone()).snapshot()?;
    let usage = ThrottleStore::new(state, config.throttle.clone()).snapshot()?;
    let latest = CheckpointStore::new(state).recover()?;
    let now = chrono::Utc::now();
    let counts = throttle::occupancy(&usage, now, &config.throttle);

    if json {
        let value = serde_json::json!({
            "circuits": circuits,
            "windows": counts,
            "latest_checkpoint": latest,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if circuits.is_empty() {
        println!("Circuits: none tracked yet");
    } else {
        println!("Circuits:");
        for (tool, record) in &circuits {
            println!(
                "  {tool}: {} ({} consecutive failures, {} total failures, {} total successes)",
                record.status,
                record.consecutive_failures,
                record.total_failures,
                record.total_successes
            );
        }
    }
    println!(
        "Windows: burst {}/{}, medium {}/{}, long {}/{}",
        counts.burst,
        counts.burst_limit,
        counts.medium,
        counts.medium_limit,
        counts.long,
        counts.long_limit
    );
    match latest {
        Some(checkpoint) => println!(
            "Latest checkpoint: {} phase \"{}\" ({} completed, {} pending)",
            checkpoint.id,
            checkpoint.phase.as_deref().unwrap_or(""),
            checkpoint.completed_steps.len(),
            checkpoint.pending_steps.len()
        ),
        None => println!("Latest checkpoint: none"),
    }
    Ok(())
}
