// ============================================================================
// ROUTE BINDINGS
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::template::{Algorithm, ChartMeta, LifecyclePolicy};

/// Where a route binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOrigin {
    /// An explicit chart template
    Template,
    /// Synthesized for a series no template matched
    Autogen,
}

/// The resolved chart and dimension one series feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    pub chart_id: CompactString,
    /// Template that produced the binding; `None` for autogen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<CompactString>,
    pub origin: RouteOrigin,
    pub dimension_name: CompactString,
    /// Label whose value identifies the dimension, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_key_label: Option<CompactString>,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    #[serde(default)]
    pub hidden: bool,
    /// Dimension set is fixed by the template and does not grow with label values
    pub static_dimension: bool,
    pub chart: Arc<ChartMeta>,
    pub lifecycle: LifecyclePolicy,
}

impl RouteBinding {
    #[inline]
    pub fn units(&self) -> &str {
        &self.chart.units
    }

    #[inline]
    pub fn is_autogen(&self) -> bool {
        self.origin == RouteOrigin::Autogen
    }
}

impl Display for RouteBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chart_id, self.dimension_name)
    }
}
