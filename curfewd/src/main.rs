// SPDX-License-Identifier: Apache-2.0

//! curfewd
//!
//! Daemon entry point: parses CLI flags, builds the Keeper, wires signal handling and
//! the heartbeat thread, then blocks until shutdown.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use lazy_static::lazy_static;
use nix::sys::signal;
use tracing::{error, info, warn, Level};

use curfew_store::{FileStore, Sha256Kdf, SystemClock};
use curfewd::channels::DispatchBox;
use curfewd::keeper::{Keeper, DEFAULT_TOLERANCE_MS};
use curfewd::{thread_manager, ChannelId, Message};

type DaemonKeeper = Keeper<SystemClock, FileStore, Sha256Kdf>;

#[derive(Parser, Debug)]
#[command(name = "curfewd", version, about, long_about = None)]
struct Cli {
    /// Path to the encrypted state file.
    #[arg(long, default_value = "/var/lib/curfewd/state")]
    state_path: PathBuf,

    /// Path to a file holding the passphrase. Required unless --passphrase-env is given.
    /// Never accept the passphrase itself as a bare CLI argument: it would leak via `ps`.
    #[arg(long, conflicts_with = "passphrase_env")]
    passphrase_file: Option<PathBuf>,

    /// Name of an environment variable holding the passphrase.
    #[arg(long, conflicts_with = "passphrase_file")]
    passphrase_env: Option<String>,

    /// Budget adopted on first run or when a prior state is judged untrustworthy.
    #[arg(long, default_value_t = 0)]
    initial_budget_ms: u64,

    /// Handshake tolerance, in milliseconds. Clamped to [5000, 60000].
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_MS)]
    tolerance_ms: u64,

    /// Heartbeat period H, in milliseconds. Recommended range [1000, 60000].
    #[arg(long, default_value_t = 10_000)]
    heartbeat_period_ms: u64,

    /// Emit structured (JSON) log messages. Defaults to human readable.
    #[arg(long)]
    json_output: bool,
}

/// State a bare `fn` signal callback needs to reach: signal handlers have no captures
/// (`curfewd::signal::Callback` is a plain `fn() -> ()`), so this is stashed in a static
/// the callback can read, set once on the main thread before signals are enabled.
struct SignalState {
    keeper: Arc<DaemonKeeper>,
    dispatch: DispatchBox<ChannelId, Message>,
}

lazy_static! {
    static ref SIGNAL_STATE: Mutex<Option<SignalState>> = Mutex::new(None);
}

/// Registered for SIGTERM and SIGINT: dispose the Keeper (final debit + persist) and
/// wake the heartbeat thread immediately so shutdown does not wait out a full period.
fn on_shutdown_signal() {
    let guard = SIGNAL_STATE.lock().unwrap();
    let Some(state) = guard.as_ref() else {
        return;
    };
    state.keeper.dispose();
    if state.dispatch.send(&ChannelId::Heartbeat, Message::ThreadAbort).is_err() {
        error!("Failed to wake the heartbeat thread for shutdown");
    }
}

fn read_passphrase(cli: &Cli) -> anyhow::Result<Vec<u8>> {
    if let Some(path) = &cli.passphrase_file {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading passphrase file {}", path.display()))?;
        return Ok(contents.trim_end_matches(['\n', '\r']).as_bytes().to_vec());
    }
    if let Some(var) = &cli.passphrase_env {
        let value = std::env::var(var)
            .with_context(|| format!("reading passphrase environment variable {var}"))?;
        return Ok(value.into_bytes());
    }
    bail!("one of --passphrase-file or --passphrase-env is required");
}

fn init_logging(json_output: bool) {
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let builder = tracing_subscriber::fmt().with_max_level(Level::DEBUG);

    if json_output {
        builder.event_format(format.json().flatten_event(true)).init();
    } else {
        builder.event_format(format).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_output);

    info!("curfewd is starting");

    let passphrase = read_passphrase(&cli)?;

    let clock = SystemClock::new().context("constructing the system clock source")?;
    let store = FileStore::new(cli.state_path.clone());
    let tolerance_ms = cli.tolerance_ms.clamp(5_000, 60_000);
    if tolerance_ms != cli.tolerance_ms {
        warn!(
            "tolerance-ms {} out of range, clamped to {}",
            cli.tolerance_ms, tolerance_ms
        );
    }

    let keeper = Arc::new(Keeper::with_tolerance(clock, store, passphrase, tolerance_ms));

    keeper.on_tamper_detected(|event| {
        error!(
            mono_elapsed_ms = event.mono_elapsed_ms,
            wall_elapsed_ms = event.wall_elapsed_ms,
            discrepancy_ms = event.discrepancy_ms,
            corruption_cause = ?event.corruption_cause,
            "tamper detected, entering locked state"
        );
    });
    keeper.on_heartbeat_saved(|event| {
        info!(
            remaining_ms = event.remaining_ms,
            heartbeat_count = event.heartbeat_count,
            "heartbeat persisted"
        );
    });

    keeper.initialize(cli.initial_budget_ms);

    let heartbeat_period = Duration::from_millis(cli.heartbeat_period_ms);

    let keeper_for_signals = keeper.clone();
    thread_manager::run(keeper, heartbeat_period, move |dispatch| {
        *SIGNAL_STATE.lock().unwrap() = Some(SignalState {
            keeper: keeper_for_signals,
            dispatch,
        });

        for sig in [signal::SIGTERM, signal::SIGINT] {
            if let Err(e) = curfewd::signal::register_signal_callback(sig, on_shutdown_signal) {
                error!("Failed to register handler for {sig}: {e}");
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod t_main {
    use serial_test::serial;

    use super::*;

    fn cli_with(passphrase_file: Option<PathBuf>, passphrase_env: Option<String>) -> Cli {
        Cli {
            state_path: PathBuf::from("/var/lib/curfewd/state"),
            passphrase_file,
            passphrase_env,
            initial_budget_ms: 0,
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            heartbeat_period_ms: 10_000,
            json_output: false,
        }
    }

    #[test]
    fn requires_a_passphrase_source() {
        let cli = cli_with(None, None);
        assert!(read_passphrase(&cli).is_err());
    }

    #[test]
    fn reads_passphrase_from_file_trimming_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passphrase");
        fs::write(&path, "hunter2\n").unwrap();

        let cli = cli_with(Some(path), None);
        assert_eq!(read_passphrase(&cli).unwrap(), b"hunter2");
    }

    // Mutates a process-global environment variable; must not interleave with another
    // test that reads or writes the same variable name.
    #[test]
    #[serial]
    fn reads_passphrase_from_environment_variable() {
        std::env::set_var("CURFEWD_TEST_PASSPHRASE", "env-secret");
        let cli = cli_with(None, Some("CURFEWD_TEST_PASSPHRASE".to_string()));
        assert_eq!(read_passphrase(&cli).unwrap(), b"env-secret");
        std::env::remove_var("CURFEWD_TEST_PASSPHRASE");
    }

    #[test]
    #[serial]
    fn missing_environment_variable_is_an_error() {
        std::env::remove_var("CURFEWD_TEST_PASSPHRASE_MISSING");
        let cli = cli_with(None, Some("CURFEWD_TEST_PASSPHRASE_MISSING".to_string()));
        assert!(read_passphrase(&cli).is_err());
    }
}
