//! File logging for the terminal host.
//!
//! The screen belongs to the board, so logs go to a daily-rolling file under
//! `~/.vitalboard/logs`. `VITALBOARD_DEBUG_LOG=1` forces debug level;
//! otherwise `RUST_LOG` is honoured with `info` as the fallback.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "vitalboard-term.log";

/// Installs the subscriber. The guard must live until exit or buffered lines are lost.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = match vitalboard_core::config::board_dir() {
        Ok(dir) => dir.join("logs"),
        Err(_) => return None,
    };
    init_in(&log_dir)
}

pub fn init_in(log_dir: &Path) -> Option<WorkerGuard> {
    if fs_err::create_dir_all(log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()
        .map(|_| guard)
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var("VITALBOARD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
