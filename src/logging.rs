use std::fs;
use std::path::Path;

use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, time::OffsetTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "speclive=info";
const LOG_FILE_PREFIX: &str = "speclive.log";

/// Console logging plus, when `log_dir` is usable, a daily rolling file.
///
/// Keep the returned guard alive for the whole process, otherwise
/// buffered file output is lost on exit.
pub fn init(offset: UtcOffset, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let timer = OffsetTime::new(offset, Rfc3339);

    let console = fmt::layer().with_target(false).with_timer(timer.clone());

    let log_dir = log_dir.filter(|dir| fs::create_dir_all(dir).is_ok());
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
    {
        eprintln!("[Main] Logging already initialized: {}", e);
        return None;
    }

    if let Some(dir) = log_dir {
        tracing::debug!("[Main] Logging to {}", dir.display());
    }
    guard
}
