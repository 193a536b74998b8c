use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "push_ci";

/// Rolling log files in a directory.
pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Creates the directory and a non-blocking writer into it. The guard
    /// flushes pending lines when dropped.
    pub fn setup_file_logging(&self) -> std::io::Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;
        let file_appender =
            RollingFileAppender::new(self.rotation.clone(), &self.log_directory, LOG_FILE_PREFIX);
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Console logging, plus file logging when `log_dir` is given. Keep the
/// returned guard alive for the life of the process.
pub fn setup_logging(debug: bool, log_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = FileLogger::new(dir).setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
