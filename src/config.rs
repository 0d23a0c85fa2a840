// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Engine configuration loaded from TOML with environment overrides:
//
//   CHARTENGINE_AUTOGEN__ENABLED=true
//   CHARTENGINE_LOGGING__LEVEL=debug
//
// Every field has a default, so an empty file is a valid configuration.
// ============================================================================

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::autogen::AutogenPolicy;
use crate::build_seq::PlannerMode;
use crate::engine::{EngineOptions, EnginePolicy, SeriesSelection};
use crate::error::{ConfigError, ConfigResult};
use crate::logging::LoggingConfig;
use crate::match_index::MatchIndex;
use crate::series::MetricKind;
use crate::template::{Algorithm, ChartMeta, DimensionLifecyclePolicy, LifecyclePolicy};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CHARTENGINE_";

// ----------------------------------------------------------------------------
// Templates
// ----------------------------------------------------------------------------

fn default_one() -> i64 {
    1
}

/// How a template's series become a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// Fixed dimension name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Take the dimension name from this series label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_label: Option<String>,

    #[serde(default)]
    pub algorithm: Algorithm,

    #[serde(default = "default_one")]
    pub multiplier: i64,

    #[serde(default = "default_one")]
    pub divisor: i64,

    #[serde(default)]
    pub hidden: bool,
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            name: None,
            from_label: None,
            algorithm: Algorithm::default(),
            multiplier: 1,
            divisor: 1,
            hidden: false,
        }
    }
}

/// Template lifecycle limits; zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Maximum dimensions per chart
    #[serde(default)]
    pub max_dims: usize,

    /// Remove dimensions unseen for more than this many build cycles
    #[serde(default)]
    pub dimension_expire_after_cycles: u64,

    /// Remove charts unseen for more than this many build cycles
    #[serde(default)]
    pub expire_after_cycles: u64,
}

impl LifecycleConfig {
    pub fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            dimensions: DimensionLifecyclePolicy {
                max_dims: self.max_dims,
                expire_after_cycles: self.dimension_expire_after_cycles,
            },
            expire_after_cycles: self.expire_after_cycles,
        }
    }
}

/// One chart template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartTemplateConfig {
    /// Unique template ID
    pub id: String,

    /// Chart ID template; instance label values are appended
    pub chart_id: String,

    /// Instance tokens: `key`, `!key` or `*`
    #[serde(default)]
    pub instances: Vec<String>,

    /// Metric names; `*` matches any run of characters
    #[serde(default)]
    pub metrics: Vec<String>,

    /// Optional tag selector a series must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Accepted metric kinds; empty accepts all
    #[serde(default)]
    pub kinds: Vec<MetricKind>,

    #[serde(flatten)]
    pub chart: ChartMeta,

    #[serde(default)]
    pub dimension: DimensionConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unmatched-series fallback
    #[serde(default)]
    pub autogen: AutogenPolicy,

    /// Engine-wide selector override; absent means no override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default)]
    pub series_selection: SeriesSelection,

    #[serde(default)]
    pub planner_mode: PlannerMode,

    /// Prefix counted against the autogen type-ID budget, usually the job name
    #[serde(default)]
    pub type_id_prefix: String,

    #[serde(default)]
    pub templates: Vec<ChartTemplateConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        debug!(
            target: "chartengine::config",
            path = %path.display(),
            templates = config.templates.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate everything an engine would reject at construction.
    pub fn validate(&self) -> ConfigResult<()> {
        self.autogen.normalize()?;

        if let Some(selector) = self.selector.as_deref().map(str::trim) {
            if !selector.is_empty() {
                crate::selector::parse_selector(selector)
                    .map_err(|e| ConfigError::invalid_value("selector", e.to_string()))?;
            }
        }

        MatchIndex::compile(&self.templates)?;
        Ok(())
    }

    /// Engine options equivalent to this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::new()
            .with_policy(EnginePolicy {
                selector: self.selector.clone(),
                autogen: Some(self.autogen),
            })
            .with_templates(self.templates.clone())
            .with_series_selection(self.series_selection)
            .with_planner_mode(self.planner_mode)
            .emit_type_id_budget_prefix(self.type_id_prefix.as_str())
    }

    /// Default configuration rendered as TOML
    pub fn generate_default_config() -> ConfigResult<String> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::RenderError {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::template::ChartType;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
type_id_prefix = "mysql_local"
series_selection = "all_visible"

[autogen]
enabled = true
max_type_id_len = 200

[logging]
level = "debug"
format = "json"

[[templates]]
id = "queries"
chart_id = "mysql_queries"
instances = ["db"]
metrics = ["mysql.queries", "mysql.questions"]
kinds = ["counter"]
title = "Queries"
units = "queries/s"
chart_type = "stacked"

[templates.dimension]
from_label = "command"
algorithm = "incremental"

[templates.lifecycle]
max_dims = 50
expire_after_cycles = 10
"#;

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();

        assert!(config.autogen.enabled);
        assert_eq!(config.autogen.max_type_id_len, 200);
        assert_eq!(config.series_selection, SeriesSelection::AllVisible);
        assert_eq!(config.planner_mode, PlannerMode::Collector);
        assert_eq!(config.logging.level, "debug");

        let template = &config.templates[0];
        assert_eq!(template.instances, vec!["db"]);
        assert_eq!(template.kinds, vec![MetricKind::Counter]);
        assert_eq!(template.chart.title, "Queries");
        assert_eq!(template.chart.chart_type, ChartType::Stacked);
        assert_eq!(template.dimension.from_label.as_deref(), Some("command"));
        assert_eq!(template.dimension.algorithm, Algorithm::Incremental);
        assert_eq!(template.dimension.multiplier, 1);
        assert_eq!(template.lifecycle.policy().dimensions.max_dims, 50);
        assert_eq!(template.lifecycle.policy().expire_after_cycles, 10);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(!config.autogen.enabled);
        assert!(config.selector.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let err = EngineConfig::from_toml_str("[autogen]\nmax_type_id_len = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "autogen.max_type_id_len"));

        let err = EngineConfig::from_toml_str("selector = \"a!b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "selector"));

        let duplicate = r#"
[[templates]]
id = "a"
chart_id = "x"
metrics = ["m"]

[[templates]]
id = "a"
chart_id = "y"
metrics = ["n"]
"#;
        assert!(matches!(
            EngineConfig::from_toml_str(duplicate).unwrap_err(),
            ConfigError::DuplicateTemplate { .. }
        ));

        assert!(matches!(
            EngineConfig::from_toml_str("autogen = 5").unwrap_err(),
            ConfigError::ParseError { .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.templates.len(), 1);
        assert_eq!(config.type_id_prefix, "mysql_local");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_engine_options_build_engine() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        let engine = Engine::new(config.engine_options()).unwrap();
        assert_eq!(engine.autogen_policy().max_type_id_len, 200);
    }

    #[test]
    fn test_default_config_round_trips() {
        let rendered = EngineConfig::generate_default_config().unwrap();
        assert!(rendered.contains("[autogen]"));
        assert_eq!(EngineConfig::from_toml_str(&rendered).unwrap(), EngineConfig::default());
    }
}
