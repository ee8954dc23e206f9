//! Log output for the `hrsync` binary.
//!
//! Everything goes to stderr: stdout carries decrypted secrets and the
//! `reconstruct` JSON, and both are piped by operators. The level comes from
//! `--verbose` or the config's `logging.level`; `RUST_LOG`, when set, wins
//! over both so a single module can be turned up during a sync. `--json` (or
//! `logging.json`) switches to one JSON object per line for the scheduler's
//! log collector.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the stderr subscriber. Returns `false` when one was already
/// installed, in which case the call changes nothing.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.is_ok()
}
