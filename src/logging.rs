//! Structured logging and diagnostics for keymenu.
//!
//! The launcher is a short-lived terminal process and logs to stderr. The
//! daemon is detached from any terminal, so it always logs to a file in the
//! cache directory.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only errors
    #[default]
    Quiet,
    /// Normal logging (info level)
    Normal,
    /// Verbose logging (debug level)
    Verbose,
    /// Very verbose logging (trace level)
    Trace,
}

impl Verbosity {
    /// Map a `-v` count to a verbosity.
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Normal,
            2 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    /// Get the tracing level filter for this verbosity.
    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level for stderr output.
    pub verbosity: Verbosity,
    /// Optional path to log file.
    pub log_file: Option<PathBuf>,
}

/// Guard that must be kept alive for the duration of logging.
///
/// When this guard is dropped, the logging system will flush pending logs.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            _file_guard: file_guard,
        }
    }
}

/// Default log file for the daemon: `<cache_dir>/keymenu/keymenu.log`.
pub fn default_log_file() -> PathBuf {
    crate::daemon::default_runtime_dir().join("keymenu.log")
}

/// Initialize logging for the launcher and other terminal commands.
///
/// Returns a guard that must be kept alive for the duration of logging.
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.verbosity.as_level_filter().into())
        .from_env_lossy();

    let (file_layer, file_guard) = match config.log_file {
        Some(ref path) => {
            let (layer, guard) = file_layer(path, LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_filter(config.verbosity.as_level_filter());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard::new(file_guard)
}

/// Initialize file-only logging for the detached daemon.
///
/// The file receives at least info-level events; `-v` raises that, and
/// `RUST_LOG` overrides both.
pub fn init_daemon_logging(log_file: Option<&Path>, verbosity: Verbosity) -> LogGuard {
    let path = log_file
        .map(Path::to_path_buf)
        .unwrap_or_else(default_log_file);
    let level = match verbosity {
        Verbosity::Quiet | Verbosity::Normal => LevelFilter::INFO,
        other => other.as_level_filter(),
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let (layer, guard) = file_layer(&path, level);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();

    LogGuard::new(Some(guard))
}

fn file_layer<S>(
    path: &Path,
    level: LevelFilter,
) -> (Box<dyn Layer<S> + Send + Sync + 'static>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let parent_dir = path.parent().unwrap_or(Path::new("."));
    let _ = std::fs::create_dir_all(parent_dir);
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keymenu.log");

    let file_appender = tracing_appender::rolling::never(parent_dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_timer(fmt::time::uptime())
        .with_writer(non_blocking)
        .with_filter(level)
        .boxed();

    (layer, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_default() {
        assert_eq!(Verbosity::default(), Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_from_occurrences() {
        assert_eq!(Verbosity::from_occurrences(0), Verbosity::Quiet);
        assert_eq!(Verbosity::from_occurrences(1), Verbosity::Normal);
        assert_eq!(Verbosity::from_occurrences(2), Verbosity::Verbose);
        assert_eq!(Verbosity::from_occurrences(7), Verbosity::Trace);
    }

    #[test]
    fn test_verbosity_as_level_filter() {
        assert_eq!(Verbosity::Quiet.as_level_filter(), LevelFilter::ERROR);
        assert_eq!(Verbosity::Normal.as_level_filter(), LevelFilter::INFO);
        assert_eq!(Verbosity::Verbose.as_level_filter(), LevelFilter::DEBUG);
        assert_eq!(Verbosity::Trace.as_level_filter(), LevelFilter::TRACE);
    }

    #[test]
    fn test_default_log_file() {
        let path = default_log_file();
        assert!(path.ends_with("keymenu/keymenu.log"));
    }
}
