//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

/// Environment variable selecting a log file instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "CNI_DRA_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "cni-dra-driver.log";

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Build the formatting layer.
///
/// Without a path events go to stderr. With a path they go to a daily rolling file
/// through a non-blocking writer; the returned guard must be kept alive for the
/// lifetime of the process or buffered lines are lost.
pub fn get_fmt_layer(
    log_path: Option<String>,
) -> Result<(BoxedLayer, Option<WorkerGuard>), InitError> {
    let Some(log_path) = log_path else {
        let stderr_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed();
        return Ok((stderr_layer, None));
    };

    let path = Path::new(&log_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    Ok((file_layer, Some(guard)))
}

/// initiate the global tracing subscriber
pub fn init(log_path: Option<String>) -> Result<Option<WorkerGuard>, InitError> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let (fmt_layer, guard) = get_fmt_layer(log_path)?;

    registry().with(fmt_layer.with_filter(env_filter)).init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_layer_has_no_guard() {
        let (_layer, guard) = get_fmt_layer(None).expect("stderr layer");
        assert!(guard.is_none());
    }

    #[test]
    fn file_layer_keeps_a_guard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("driver.log");

        let (_layer, guard) =
            get_fmt_layer(Some(path.display().to_string())).expect("file layer");
        assert!(guard.is_some());
    }
}
