//! Logging for the valued CLI
//!
//! The library itself only emits `tracing` events and never installs a
//! subscriber; an embedding application routes them wherever it likes.
//! [`init`] is what the CLI uses: a daily-rotated file under
//! `$XDG_STATE_HOME/valued/`, with the HTTP stack held at `warn` unless
//! `RUST_LOG` asks for more.

use crate::config::{Config, LoggingConfig};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of the rotated log files (`valued.log.YYYY-MM-DD`)
const LOG_FILE_PREFIX: &str = "valued.log";

/// Targets that are chatty at `debug` for every request
const TRANSPORT_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Initialize file logging for the CLI
///
/// `RUST_LOG` wins over the configured level. If the host process already
/// installed a global subscriber, that one is left in place.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global subscriber already set, file logging not installed");
    }

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// `level` for valued's own targets, `warn` for the HTTP stack.
fn level_filter(level: &str) -> EnvFilter {
    TRANSPORT_TARGETS
        .iter()
        .fold(EnvFilter::new(level), |filter, target| {
            match format!("{target}=warn").parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            }
        })
}

/// Route events to the test harness output (`RUST_LOG` selects the level)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

/// Flushes buffered log lines when dropped.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}
