//! Logging Module
//!
//! Daily-rotated log files beside the token store, plus console output in
//! debug builds. `DWW_LOG` overrides the filter.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "dww-companion.log";
const FILTER_ENV: &str = "DWW_LOG";

#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str = "debug,hyper=warn,reqwest=warn";
#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Install the global subscriber, writing into `log_dir`.
///
/// Logging stays console-only if the directory cannot be created.
pub fn init(log_dir: &Path) {
    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX)),
        ),
        Err(e) => {
            eprintln!("log directory {} unavailable: {}", log_dir.display(), e);
            None
        }
    };

    #[cfg(debug_assertions)]
    let console_layer = Some(fmt::layer().with_target(true).pretty());
    #[cfg(not(debug_assertions))]
    let console_layer: Option<fmt::Layer<_>> = None;

    let subscriber = tracing_subscriber::registry()
        .with(filter())
        .with(file_layer)
        .with(console_layer);

    // A subscriber may already be installed (tests, embedding hosts)
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        init(&log_dir);

        assert!(log_dir.is_dir());
    }
}
