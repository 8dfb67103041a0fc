//! Tracing subscriber setup for hosts embedding the session engine

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{Result, SessionError};

/// `[logging]` table of the settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset, e.g. `info,rcs_msrp_core=debug`
    pub filter: String,
    /// One JSON object per line on stdout
    pub json: bool,
    /// Log span open and close, useful to follow one session
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Parse the configured directives
    pub fn directives(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| SessionError::config(format!("invalid log filter '{}': {}", self.filter, e)))
    }
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already set.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.directives()?,
    };

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| SessionError::config(format!("cannot install subscriber: {}", e)))?;

    tracing::info!("RCS session engine v{} logging", env!("CARGO_PKG_VERSION"));
    Ok(())
}
