//! Log sink setup.
//!
//! Every invocation, daemon or forwarder, appends its `tracing` output to
//! one shared log file. User-facing replies never go through the logger.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use handyd_config::AppConfig;

/// Where log output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    /// The log file could not be opened.
    Stderr,
}

/// Filter directive for the configured level raised by `-v` flags.
pub fn filter_directive(level: &str, verbose: u8) -> &str {
    match verbose {
        0 => level,
        1 if matches!(level, "trace" | "debug") => level,
        1 => "debug",
        _ => "trace",
    }
}

/// Open the log file for appending, creating it and its parent directory.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Falls back to stderr if the log file cannot be opened. Calling this more
/// than once keeps the first subscriber.
pub fn init(config: &AppConfig, verbose: u8) -> LogTarget {
    let directive = filter_directive(&config.logging.level, verbose);
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let path = config.log_path();

    match open_log_file(&path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
            LogTarget::File(path)
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(io::stderr)
                .try_init();
            tracing::warn!(path = %path.display(), error = %e, "Cannot open log file, logging to stderr");
            LogTarget::Stderr
        }
    }
}
