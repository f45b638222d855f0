//! Logging setup for the command-line runner
//!
//! Logs go to stderr so stdout only carries the command's result.

use std::io;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json_format: bool,
    /// Include timestamp in logs
    pub include_timestamp: bool,
    /// Environment filter overriding `level` (e.g. "sequent_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_timestamp: true,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Debug output for this crate and the migration library
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            env_filter: Some("sequent=debug,sequent_migrate=debug,sqlx=warn".to_string()),
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json_format = json;
        self
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directives = self.env_filter.as_deref().unwrap_or(&self.level);
        Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?)
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.filter()?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else if config.include_timestamp {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .without_time(),
            )
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );
    Ok(())
}
