use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::db::config::env_bool;

const LOG_FILE_PREFIX: &str = "curriculum.log";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    /// Daily rolling file output, enabled by `ENABLE_FILE_LOGS`.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env(log_level: &str) -> Self {
        let file_dir = env_bool("ENABLE_FILE_LOGS", false).then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });
        Self {
            level: log_level.to_string(),
            file_dir,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    init_with(&LogSettings::from_env(log_level))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_with(settings: &LogSettings) -> Option<FileLogGuard> {
    let stdout_layer = fmt::layer().with_target(true);

    if let Some(log_dir) = &settings.file_dir {
        match std::fs::create_dir_all(log_dir) {
            Err(err) => eprintln!("failed to create log directory {}: {err}", log_dir.display()),
            Ok(()) => {
                let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                let installed = tracing_subscriber::registry()
                    .with(settings.filter())
                    .with(stdout_layer)
                    .with(file_layer)
                    .try_init()
                    .is_ok();

                return installed.then_some(FileLogGuard { _guard: guard });
            }
        }
    }

    let _ = tracing_subscriber::registry()
        .with(settings.filter())
        .with(stdout_layer)
        .try_init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_uses_configured_level() {
        let settings = LogSettings {
            level: "warn".to_string(),
            file_dir: None,
        };
        assert!(settings.filter().to_string().contains("warn"));
    }
}
