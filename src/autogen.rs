// ============================================================================
// AUTOGEN ROUTE SYNTHESIS
// ============================================================================
// Fallback charts for series no template matched. One builder per series
// shape, selected by flatten role and kind:
//
//   scalar            chart = name-k1=v1-k2=v2, dimension = last name segment
//   histogram bucket  `le` leaves the chart ID and names the dimension
//   summary quantile  `quantile` leaves the chart ID and names the dimension
//   state set         the state label leaves the chart ID and names the dimension
//
// Every synthesized chart must fit the type-ID budget `prefix.chart_id`.
// ============================================================================

use std::sync::Arc;

use compact_str::{format_compact, CompactString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::route::{RouteBinding, RouteOrigin};
use crate::series::{FlattenRole, LabelSet, LabelView, MetricKind, SeriesMeta};
use crate::template::{Algorithm, ChartMeta, ChartType, LifecyclePolicy};

/// Default maximum length of the emitted `prefix.chart_id` identifier
pub const DEFAULT_MAX_TYPE_ID_LEN: usize = 1200;

/// Smallest accepted type-ID budget
pub const MIN_TYPE_ID_LEN: usize = 4;

pub const HISTOGRAM_BUCKET_LABEL: &str = "le";
pub const SUMMARY_QUANTILE_LABEL: &str = "quantile";

const HISTOGRAM_BUCKET_SUFFIX: &str = "_bucket";

// ----------------------------------------------------------------------------
// Policy
// ----------------------------------------------------------------------------

fn default_max_type_id_len() -> usize {
    DEFAULT_MAX_TYPE_ID_LEN
}

/// Unmatched-series fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutogenPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Type-ID budget; 0 selects the default
    #[serde(default = "default_max_type_id_len")]
    pub max_type_id_len: usize,
    /// Remove autogen charts unseen for more than this many build cycles (0 = never)
    #[serde(default)]
    pub expire_after_cycles: u64,
}

impl Default for AutogenPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_type_id_len: DEFAULT_MAX_TYPE_ID_LEN,
            expire_after_cycles: 0,
        }
    }
}

impl AutogenPolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Resolve the default budget and reject budgets below the floor.
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        if self.max_type_id_len == 0 {
            self.max_type_id_len = DEFAULT_MAX_TYPE_ID_LEN;
        }
        if self.max_type_id_len < MIN_TYPE_ID_LEN {
            return Err(ConfigError::invalid_value(
                "autogen.max_type_id_len",
                format!(
                    "must be >= {}, got {}",
                    MIN_TYPE_ID_LEN, self.max_type_id_len
                ),
            ));
        }
        Ok(self)
    }

    fn lifecycle(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            expire_after_cycles: self.expire_after_cycles,
            ..LifecyclePolicy::default()
        }
    }
}

/// Whether `prefix.chart_id` (or `chart_id` without a prefix) fits `max_len`.
pub fn fits_type_id_budget(max_len: usize, type_id_prefix: &str, chart_id: &str) -> bool {
    let len = if type_id_prefix.is_empty() {
        chart_id.len()
    } else {
        type_id_prefix.len() + 1 + chart_id.len()
    };
    len <= max_len
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

/// Synthesizes one route, or `None` when the series cannot be charted.
pub type AutogenBuilder = fn(&str, &LabelSet, SeriesMeta, &AutogenPolicy, &str) -> Option<RouteBinding>;

/// Select the builder for a series shape.
pub fn builder_for(meta: SeriesMeta) -> AutogenBuilder {
    match meta.flatten_role {
        FlattenRole::HistogramBucket => build_histogram_bucket_route,
        FlattenRole::SummaryQuantile => build_summary_quantile_route,
        FlattenRole::StateSetState => build_state_set_route,
        FlattenRole::HistogramSum
        | FlattenRole::HistogramCount
        | FlattenRole::SummarySum
        | FlattenRole::SummaryCount
        | FlattenRole::None => build_scalar_route,
    }
}

/// Synthesize the autogen route for a series, honoring the policy.
pub fn synthesize(
    name: &str,
    labels: &LabelSet,
    meta: SeriesMeta,
    policy: &AutogenPolicy,
    type_id_prefix: &str,
) -> Option<RouteBinding> {
    if !policy.enabled {
        return None;
    }
    builder_for(meta)(name, labels, meta, policy, type_id_prefix)
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

/// Counter or gauge series; also the flattened sum/count parts.
pub fn build_scalar_route(
    name: &str,
    labels: &LabelSet,
    meta: SeriesMeta,
    policy: &AutogenPolicy,
    type_id_prefix: &str,
) -> Option<RouteBinding> {
    let chart_id = chart_id_without(name, labels, &[]);
    if !fits_type_id_budget(policy.max_type_id_len, type_id_prefix, &chart_id) {
        return None;
    }

    let cumulative = is_cumulative(meta);
    let (algorithm, units) = if cumulative {
        (Algorithm::Incremental, counter_units(name))
    } else {
        (Algorithm::Absolute, gauge_units(name))
    };

    Some(binding(
        chart_id,
        last_segment(name).into(),
        None,
        algorithm,
        true,
        chart_meta(name, units, ChartType::Line),
        policy,
    ))
}

/// One bucket of a flattened histogram.
pub fn build_histogram_bucket_route(
    name: &str,
    labels: &LabelSet,
    _meta: SeriesMeta,
    policy: &AutogenPolicy,
    type_id_prefix: &str,
) -> Option<RouteBinding> {
    let le = labels.get(HISTOGRAM_BUCKET_LABEL)?;
    let base = name.strip_suffix(HISTOGRAM_BUCKET_SUFFIX).unwrap_or(name);

    let chart_id = chart_id_without(base, labels, &[HISTOGRAM_BUCKET_LABEL]);
    if !fits_type_id_budget(policy.max_type_id_len, type_id_prefix, &chart_id) {
        return None;
    }

    Some(binding(
        chart_id,
        format_compact!("bucket_{le}"),
        Some(HISTOGRAM_BUCKET_LABEL),
        Algorithm::Incremental,
        false,
        chart_meta(base, "observations/s".into(), ChartType::Stacked),
        policy,
    ))
}

/// One quantile of a flattened summary.
pub fn build_summary_quantile_route(
    name: &str,
    labels: &LabelSet,
    _meta: SeriesMeta,
    policy: &AutogenPolicy,
    type_id_prefix: &str,
) -> Option<RouteBinding> {
    let quantile = labels.get(SUMMARY_QUANTILE_LABEL)?;

    let chart_id = chart_id_without(name, labels, &[SUMMARY_QUANTILE_LABEL]);
    if !fits_type_id_budget(policy.max_type_id_len, type_id_prefix, &chart_id) {
        return None;
    }

    Some(binding(
        chart_id,
        format_compact!("quantile_{quantile}"),
        Some(SUMMARY_QUANTILE_LABEL),
        Algorithm::Absolute,
        false,
        chart_meta(name, gauge_units(name), ChartType::Line),
        policy,
    ))
}

/// One state of a flattened state set; the state lives in the label named
/// after the metric.
pub fn build_state_set_route(
    name: &str,
    labels: &LabelSet,
    _meta: SeriesMeta,
    policy: &AutogenPolicy,
    type_id_prefix: &str,
) -> Option<RouteBinding> {
    let state = labels.get(name)?;

    let chart_id = chart_id_without(name, labels, &[name]);
    if !fits_type_id_budget(policy.max_type_id_len, type_id_prefix, &chart_id) {
        return None;
    }

    Some(binding(
        chart_id,
        state.into(),
        Some(name),
        Algorithm::Absolute,
        false,
        chart_meta(name, "state".into(), ChartType::Line),
        policy,
    ))
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn binding(
    chart_id: CompactString,
    dimension_name: CompactString,
    dimension_key_label: Option<&str>,
    algorithm: Algorithm,
    static_dimension: bool,
    chart: ChartMeta,
    policy: &AutogenPolicy,
) -> RouteBinding {
    RouteBinding {
        chart_id,
        template_id: None,
        origin: RouteOrigin::Autogen,
        dimension_name,
        dimension_key_label: dimension_key_label.map(CompactString::from),
        algorithm,
        multiplier: 1,
        divisor: 1,
        hidden: false,
        static_dimension,
        chart: Arc::new(chart),
        lifecycle: policy.lifecycle(),
    }
}

// `name-k1=v1-k2=v2` over the labels in key order, skipping `excluded`.
fn chart_id_without(name: &str, labels: &LabelSet, excluded: &[&str]) -> CompactString {
    let mut id = CompactString::from(name);
    for label in labels.without(excluded) {
        id.push('-');
        id.push_str(&label.key);
        id.push('=');
        id.push_str(&label.value);
    }
    id
}

fn last_segment(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(_, last)| last)
}

fn family(name: &str) -> &str {
    name.split_once('.').map_or(name, |(first, _)| first)
}

fn chart_meta(name: &str, units: CompactString, chart_type: ChartType) -> ChartMeta {
    ChartMeta {
        title: name.into(),
        context: format_compact!("autogen.{name}"),
        family: family(name).into(),
        units,
        chart_type,
        ..ChartMeta::default()
    }
}

fn is_cumulative(meta: SeriesMeta) -> bool {
    matches!(
        meta.flatten_role,
        FlattenRole::HistogramSum
            | FlattenRole::HistogramCount
            | FlattenRole::SummarySum
            | FlattenRole::SummaryCount
    ) || (meta.flatten_role == FlattenRole::None && meta.kind == MetricKind::Counter)
}

// ----------------------------------------------------------------------------
// Units
// ----------------------------------------------------------------------------

/// Base-unit name suffixes and the units they chart as.
const UNIT_SUFFIXES: &[(&str, &str)] = &[
    ("_seconds", "seconds"),
    ("_milliseconds", "milliseconds"),
    ("_bytes", "bytes"),
    ("_bits", "bits"),
    ("_celsius", "celsius"),
    ("_ratio", "ratio"),
    ("_percent", "percentage"),
    ("_volts", "volts"),
    ("_amperes", "amperes"),
    ("_watts", "watts"),
    ("_joules", "joules"),
    ("_hertz", "Hz"),
    ("_meters", "meters"),
    ("_grams", "grams"),
    ("_info", "info"),
];

const CUMULATIVE_SUFFIXES: &[&str] = &["_total", "_sum", "_count"];

fn unit_for_suffix(name: &str) -> Option<&'static str> {
    UNIT_SUFFIXES
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix))
        .map(|(_, units)| *units)
}

fn gauge_units(name: &str) -> CompactString {
    unit_for_suffix(name).unwrap_or("value").into()
}

fn counter_units(name: &str) -> CompactString {
    let base = CUMULATIVE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name);
    match unit_for_suffix(base) {
        Some(units) => format_compact!("{units}/s"),
        None => "events/s".into(),
    }
}
