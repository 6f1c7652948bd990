/*!
 * Log subscriber setup
 *
 * The crate itself only emits `tracing` events. A subscriber is installed
 * when the process-wide registry is configured through
 * [`crate::registry::init_global`], or by the host application.
 */

use std::fs::File;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;
use crate::error::{FsError, Result};

/// Install a subscriber for `config`
///
/// Events go to stdout in compact form, or as JSON lines to
/// `config.log_file`. `RUST_LOG` overrides the configured level. Returns
/// false when another subscriber was already installed; that one is kept.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;

    let layer = match &config.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                FsError::Config(format!("cannot create log file {}: {}", path.display(), e))
            })?;
            fmt::layer()
                .with_writer(file)
                .with_thread_names(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(false)
                .json()
                .boxed()
        }
        None => fmt::layer().with_target(true).compact().boxed(),
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok())
}

/// Level the default filter is built from
fn effective_level(config: &LoggingConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("farpath={}", effective_level(config))))
        .map_err(|e| FsError::Config(format!("invalid log filter: {}", e)))
}

/// Route events to the test harness; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("farpath=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = LoggingConfig {
            log_level: LogLevel::Error,
            log_file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let config = LoggingConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_unwritable_log_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            log_file: Some(dir.path().join("missing").join("farpath.log")),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_existing_subscriber_is_kept() {
        init_test_logging();
        assert!(!init_logging(&LoggingConfig::default()).unwrap());
    }
}
