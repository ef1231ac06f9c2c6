//! Logging initialization with request-variable formatting and optional
//! file-based daily rotation.

use crate::augment::ContextFormat;
use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Every record is rendered through [`ContextFormat`] built from
/// `config.format`, so request variables appear on all lines regardless of
/// which code logged them.
///
/// - `to_file=true` → daily rotating file appender with non-blocking writer
/// - `to_file=false` → stderr output (default)
///
/// Returns an `Option<WorkerGuard>` that **must be held** for the lifetime of
/// the application to ensure buffered logs are flushed on shutdown.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let format = ContextFormat::from_template(config.template()?);

    if config.to_file {
        let file_appender = tracing_appender::rolling::daily(&config.dir, &config.file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .event_format(format)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .event_format(format)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

        Ok(None)
    }
}
