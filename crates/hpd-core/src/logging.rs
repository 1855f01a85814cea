//! Logging configuration using tracing
//!
//! This is the diagnostic sink: an append-only log file. Nothing reads it
//! back for control flow.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_FILE_NAME: &str = "hpd.log";
const DEFAULT_FILTER: &str = "hpd=info,hpd_core=info,hpd_daemon=info,hpd_app=info,hotplug_dispatch=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/hotplug-dispatch/logs/`.
/// Log level is controlled by the `HPD_LOG` environment variable.
/// With `foreground` set, events are mirrored to stderr as well.
///
/// # Examples
/// ```bash
/// HPD_LOG=debug hpd run
/// HPD_LOG=hpd_app=trace hpd run --foreground
/// ```
pub fn init(foreground: bool) -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let env_filter =
        EnvFilter::try_from_env("HPD_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr_layer = foreground.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .with(stderr_layer)
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("hotplug-dispatch starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("hotplug-dispatch").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_lives_under_app_directory() {
        let dir = get_log_directory().unwrap();
        assert!(dir.ends_with("hotplug-dispatch/logs"));
    }
}
