//! Logging initialization

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::Result;

/// Initialize the tracing subscriber with a console layer and a daily-rolling
/// file layer. `RUST_LOG` overrides `log_level` when set.
pub fn init<P: AsRef<Path>>(log_level: &str, log_file: P) -> Result<()> {
    let log_file = log_file.as_ref();
    let directory = log_file.parent().unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .unwrap_or(std::ffi::OsStr::new("robot.log"));
    std::fs::create_dir_all(directory)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, file_name);

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
