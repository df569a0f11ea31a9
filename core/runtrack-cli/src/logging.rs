//! Subscriber setup for the `runtrack` binary.
//!
//! Logs go to stderr so stdout stays reserved for command output. With
//! `--log-dir` a daily-rolling file is written as well; the returned guard
//! must live until exit so buffered lines are flushed.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "RUNTRACK_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "runtrack.log";

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn build_filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = build_filter();

    match log_dir {
        Some(dir) => {
            if let Err(err) = fs_err::create_dir_all(dir) {
                eprintln!("runtrack: cannot create log directory: {}", err);
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
                return None;
            }
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr.and(file_writer))
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
