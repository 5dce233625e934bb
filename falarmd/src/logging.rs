use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use crate::{config::LoggingConfig, ConfigError, FireAlarmError};

const LOG_FILE_PREFIX: &str = "falarmd.log";

/// Route `log` records from the library crates into tracing, and install
/// a subscriber writing either to a daily rolling file or to stdout.
///
/// The returned guard flushes buffered lines when dropped, so it must be
/// held for the lifetime of the process
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard, FireAlarmError> {
    LogTracer::init()?;

    let level = config
        .level
        .parse::<tracing::Level>()
        .map_err(|_| ConfigError::Invalid(format!("unknown log level {:?}", config.level)))?;

    let (writer, guard) = match &config.directory {
        Some(dir) => tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX)),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let sub = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(config.directory.is_none())
        .finish();

    tracing::subscriber::set_global_default(sub)?;

    Ok(guard)
}
