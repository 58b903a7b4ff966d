//! Tracing subscriber setup for the `cistern` binary.
//!
//! `RUST_LOG` wins over the configured level when set.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::config::{CisternConfig, LoggingConfig};
use crate::error::{AppResult, CisternError};

/// Build the filter: `RUST_LOG` if present, otherwise `level` for this crate and
/// `warn` for everything else.
pub fn filter(level: &str) -> AppResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("warn,cistern_monitor={level},cistern={level}"))
        .map_err(|e| CisternError::ConfigValidation(format!("Invalid log level '{level}': {e}")))
}

/// Install the global subscriber. Human-readable by default, JSON lines when
/// `json` is set (or forced by `json_override`).
pub fn init(config: &LoggingConfig, json_override: bool) -> AppResult<()> {
    let filter = filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if config.json || json_override {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CisternError::ConfigValidation(format!("Logging already initialized: {e}")))
}

/// Load the configuration at `path` and install the subscriber it describes.
///
/// A load failure is logged through a default subscriber before it is returned, so
/// the fatal path reaches the log stream too.
pub fn init_from_config(path: &Path, json_override: bool) -> AppResult<CisternConfig> {
    match CisternConfig::load_from(path) {
        Ok(config) => {
            init(&config.logging, json_override)?;
            Ok(config)
        }
        Err(e) => {
            // An already-installed subscriber is fine here.
            let _ = init(&LoggingConfig::default(), json_override);
            tracing::error!(config = %path.display(), error = %e, "Failed to load configuration");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_filter_accepts_known_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(filter(level).is_ok(), "{level}");
        }
    }

    #[traced_test]
    #[test]
    fn test_config_failure_reaches_log() {
        let err = init_from_config(Path::new("/nonexistent/cistern.toml"), false)
            .expect_err("missing file");

        assert!(matches!(err, CisternError::ConfigLoad(_)));
        assert!(logs_contain("Failed to load configuration"));
        assert!(logs_contain("/nonexistent/cistern.toml"));
    }
}
