// ============================================================================
// LOGGING INFRASTRUCTURE
// ============================================================================
// Structured logging via `tracing`. Engine events use the targets
//
//   chartengine::engine     plan summaries, guard transitions, reloads
//   chartengine::cache      route cache pruning
//   chartengine::lifecycle  cap eviction and expiry
//   chartengine::config     configuration loading
//
// Output goes to stderr so stdout stays free for command output.
// ============================================================================

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{EngineError, EngineResult};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level; `RUST_LOG` directives take precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    fn level_filter(&self) -> LevelFilter {
        match self.level.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            "off" => LevelFilter::OFF,
            _ => LevelFilter::INFO,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> EngineResult<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level_filter().into())
        .from_env_lossy();

    let installed = match config.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        "compact" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        _ => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|e| EngineError::Logging(e.to_string()))?;

    info!(
        target: "chartengine::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("trace", LevelFilter::TRACE)]
    #[case("DEBUG", LevelFilter::DEBUG)]
    #[case("warning", LevelFilter::WARN)]
    #[case("off", LevelFilter::OFF)]
    #[case("bogus", LevelFilter::INFO)]
    fn test_level_filter(#[case] level: &str, #[case] want: LevelFilter) {
        let config = LoggingConfig {
            level: level.to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(config.level_filter(), want);
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig {
            level: "off".to_string(),
            format: "compact".to_string(),
            ..LoggingConfig::default()
        };
        // The first call may lose to another test; the second always fails.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
