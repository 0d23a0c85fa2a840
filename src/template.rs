// ============================================================================
// CHART TEMPLATES
// ============================================================================
// Declarative building blocks owned by configuration and read-only to the
// engine: the chart ID template, the instance-by-label tokens that split one
// template into per-instance charts, chart metadata and lifecycle policy.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

// ----------------------------------------------------------------------------
// Chart ID Template
// ----------------------------------------------------------------------------

/// A literal chart ID template. Braces and pipes carry no meaning here and
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    pub raw: CompactString,
}

impl Template {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a chart ID template. Surrounding whitespace is trimmed and the
/// result must not be empty.
pub fn parse_template(raw: &str) -> Result<Template, TemplateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TemplateError::Empty);
    }
    Ok(Template { raw: raw.into() })
}

// ----------------------------------------------------------------------------
// Instance Tokens
// ----------------------------------------------------------------------------

/// One instance-by-label rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceToken {
    /// Label required to materialize; its value becomes a suffix part
    Key(CompactString),
    /// Label never used for the suffix
    Exclude(CompactString),
    /// Every remaining label, in key order
    IncludeAll,
}

impl InstanceToken {
    /// Parse the textual form: `key`, `!key` or `*`.
    pub fn parse(token: &str) -> Result<Self, TemplateError> {
        let token = token.trim();
        if token == "*" {
            return Ok(InstanceToken::IncludeAll);
        }

        let (exclude, key) = match token.strip_prefix('!') {
            Some(key) => (true, key),
            None => (false, token),
        };

        if key.is_empty() {
            return Err(TemplateError::InvalidInstanceToken {
                token: token.to_string(),
                reason: "empty label key",
            });
        }
        if key.chars().any(|c| c.is_whitespace() || c == '!' || c == '*') {
            return Err(TemplateError::InvalidInstanceToken {
                token: token.to_string(),
                reason: "label key contains a forbidden character",
            });
        }

        Ok(if exclude {
            InstanceToken::Exclude(key.into())
        } else {
            InstanceToken::Key(key.into())
        })
    }
}

impl Display for InstanceToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InstanceToken::Key(key) => write!(f, "{key}"),
            InstanceToken::Exclude(key) => write!(f, "!{key}"),
            InstanceToken::IncludeAll => write!(f, "*"),
        }
    }
}

/// Parse a list of instance tokens, keeping declared order.
pub fn parse_instance_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<InstanceToken>, TemplateError> {
    tokens.iter().map(|t| InstanceToken::parse(t.as_ref())).collect()
}

/// Template ID plus the rules that split it into per-instance charts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartIdentity {
    pub id_template: Template,
    pub instance_by_labels: Vec<InstanceToken>,
}

impl ChartIdentity {
    pub fn new(id_template: Template, instance_by_labels: Vec<InstanceToken>) -> Self {
        Self {
            id_template,
            instance_by_labels,
        }
    }

    /// Identity that never splits by label
    pub fn single(id_template: Template) -> Self {
        Self::new(id_template, Vec::new())
    }
}

// ----------------------------------------------------------------------------
// Chart Metadata
// ----------------------------------------------------------------------------

/// How the job runtime turns raw values into plotted values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Absolute,
    Incremental,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Absolute => "absolute",
            Algorithm::Incremental => "incremental",
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Stacked,
    Heatmap,
}

/// Default chart priority for charts that do not set one
pub const DEFAULT_CHART_PRIORITY: u32 = 70000;

fn default_priority() -> u32 {
    DEFAULT_CHART_PRIORITY
}

/// Presentation metadata passed through to the job runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartMeta {
    #[serde(default)]
    pub title: CompactString,
    #[serde(default)]
    pub context: CompactString,
    #[serde(default)]
    pub family: CompactString,
    #[serde(default)]
    pub units: CompactString,
    #[serde(default)]
    pub chart_type: ChartType,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl Default for ChartMeta {
    fn default() -> Self {
        Self {
            title: CompactString::default(),
            context: CompactString::default(),
            family: CompactString::default(),
            units: CompactString::default(),
            chart_type: ChartType::default(),
            priority: DEFAULT_CHART_PRIORITY,
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Policy
// ----------------------------------------------------------------------------

/// Dimension limits of one chart. Zero disables the respective limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionLifecyclePolicy {
    /// Maximum number of dimensions; least recently seen are evicted first
    #[serde(default)]
    pub max_dims: usize,
    /// Remove a dimension unseen for more than this many build cycles
    #[serde(default)]
    pub expire_after_cycles: u64,
}

/// Lifecycle policy attached to a chart on creation; immutable for that chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    #[serde(default)]
    pub dimensions: DimensionLifecyclePolicy,
    /// Remove the whole chart when unseen for more than this many build cycles
    #[serde(default)]
    pub expire_after_cycles: u64,
}

impl LifecyclePolicy {
    pub fn is_unbounded(&self) -> bool {
        self.dimensions.max_dims == 0
            && self.dimensions.expire_after_cycles == 0
            && self.expire_after_cycles == 0
    }
}
