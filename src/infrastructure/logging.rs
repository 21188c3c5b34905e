//! Logging initialization
//!
//! Console output through a fmt layer with `RUST_LOG`/config-level filtering,
//! plus an optional non-blocking daily-rotated file layer. The file writer's
//! guard lives in a process-wide static so the worker thread outlives init.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::infrastructure::config::LoggingConfig;

static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Initialize logging from the app config. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("plate_watch={0},warn", config.level)));

    let console_layer = fmt::layer().with_target(false);

    if config.file_output {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "plate-watch.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        LOG_GUARDS
            .lock()
            .expect("log guard mutex poisoned")
            .push(guard);

        let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
        Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(console_layer)
            .try_init()?;
    }

    Ok(())
}
