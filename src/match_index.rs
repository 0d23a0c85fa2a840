// ============================================================================
// MATCH INDEX
// ============================================================================
// Compiled form of every chart template's selection rules. Exact metric names
// resolve through a hash lookup, `*` globs through an ordered pattern list;
// the two candidate sets are merged back into declared template order before
// the per-template filters (kinds, tag selector, instance labels) run.
// ============================================================================

use std::sync::Arc;

use ahash::AHashMap;
use compact_str::CompactString;
use regex::Regex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::{ChartTemplateConfig, DimensionConfig};
use crate::error::{ConfigError, TemplateError};
use crate::identity::render_chart_instance_id;
use crate::route::{RouteBinding, RouteOrigin};
use crate::selector::{parse_selector, Selector, Tags};
use crate::series::{LabelView, MetricKind, Series};
use crate::template::{
    parse_instance_tokens, parse_template, Algorithm, ChartIdentity, ChartMeta, LifecyclePolicy,
};

// ----------------------------------------------------------------------------
// Compiled Templates
// ----------------------------------------------------------------------------

/// How a template names the dimension a series feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionRule {
    /// Fixed dimension name
    Name(CompactString),
    /// Value of a series label
    FromLabel(CompactString),
    /// Last `.` segment of the metric name
    MetricSegment,
}

#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub rule: DimensionRule,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
}

impl DimensionSpec {
    fn compile(config: &DimensionConfig) -> Result<Self, ConfigError> {
        let rule = match (&config.name, &config.from_label) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid_value(
                    "dimension",
                    "'name' and 'from_label' are mutually exclusive",
                ))
            }
            (Some(name), None) if name.trim().is_empty() => {
                return Err(ConfigError::invalid_value("dimension.name", "must not be empty"))
            }
            (None, Some(label)) if label.trim().is_empty() => {
                return Err(ConfigError::invalid_value("dimension.from_label", "must not be empty"))
            }
            (Some(name), None) => DimensionRule::Name(name.trim().into()),
            (None, Some(label)) => DimensionRule::FromLabel(label.trim().into()),
            (None, None) => DimensionRule::MetricSegment,
        };

        Ok(Self {
            rule,
            algorithm: config.algorithm,
            multiplier: non_zero_or_one(config.multiplier),
            divisor: non_zero_or_one(config.divisor),
            hidden: config.hidden,
        })
    }

    fn resolve<'a>(&'a self, series: &'a Series) -> Option<&'a str> {
        match &self.rule {
            DimensionRule::Name(name) => Some(name.as_str()),
            DimensionRule::FromLabel(label) => series.labels.get(label),
            DimensionRule::MetricSegment => Some(
                series
                    .name
                    .rsplit_once('.')
                    .map_or(series.name.as_str(), |(_, last)| last),
            ),
        }
    }
}

fn non_zero_or_one(value: i64) -> i64 {
    if value == 0 {
        1
    } else {
        value
    }
}

/// One template, validated and ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub id: CompactString,
    pub identity: ChartIdentity,
    pub selector: Option<Selector>,
    pub kinds: SmallVec<[MetricKind; 4]>,
    pub dimension: DimensionSpec,
    pub chart: Arc<ChartMeta>,
    pub lifecycle: LifecyclePolicy,
}

impl CompiledTemplate {
    /// Validate and compile one template configuration.
    pub fn compile(config: &ChartTemplateConfig) -> Result<Self, ConfigError> {
        let id = config.id.trim();
        let wrap = |err: TemplateError| ConfigError::template_compile(id, err);

        let id_template = parse_template(&config.chart_id).map_err(wrap)?;
        let tokens = parse_instance_tokens(&config.instances).map_err(wrap)?;

        let selector = match config.selector.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(expr) => Some(parse_selector(expr).map_err(|err| ConfigError::template_compile(id, err))?),
        };

        let dimension = DimensionSpec::compile(&config.dimension).map_err(|err| match err {
            ConfigError::InvalidValue { field, message } => {
                ConfigError::invalid_value(format!("templates.{id}.{field}"), message)
            }
            other => other,
        })?;

        Ok(Self {
            id: id.into(),
            identity: ChartIdentity::new(id_template, tokens),
            selector,
            kinds: config.kinds.iter().copied().collect(),
            dimension,
            chart: Arc::new(config.chart.clone()),
            lifecycle: config.lifecycle.policy(),
        })
    }

    fn accepts_kind(&self, kind: MetricKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    /// Route one series through this template, or `None` when it cannot
    /// materialize an instance.
    fn route(&self, series: &Series, tags: &mut Option<Tags>) -> Option<RouteBinding> {
        if !self.accepts_kind(series.meta.kind) {
            return None;
        }

        if let Some(selector) = &self.selector {
            let tags = tags.get_or_insert_with(|| series.tags());
            if !selector.matches(tags) {
                return None;
            }
        }

        let chart_id = match render_chart_instance_id(&self.identity, &series.labels) {
            Ok(Some(chart_id)) => chart_id,
            Ok(None) => {
                trace!(
                    target: "chartengine::engine",
                    template = %self.id,
                    series = %series.identity,
                    "Missing instance label, template skipped"
                );
                return None;
            }
            Err(e) => {
                debug!(target: "chartengine::engine", template = %self.id, error = %e, "Chart ID render failed");
                return None;
            }
        };

        let dimension_name = self.dimension.resolve(series)?;
        let dimension_key_label = match &self.dimension.rule {
            DimensionRule::FromLabel(label) => Some(label.clone()),
            _ => None,
        };

        Some(RouteBinding {
            chart_id: chart_id.into(),
            template_id: Some(self.id.clone()),
            origin: RouteOrigin::Template,
            dimension_name: dimension_name.into(),
            static_dimension: dimension_key_label.is_none(),
            dimension_key_label,
            algorithm: self.dimension.algorithm,
            multiplier: self.dimension.multiplier,
            divisor: self.dimension.divisor,
            hidden: self.dimension.hidden,
            chart: Arc::clone(&self.chart),
            lifecycle: self.lifecycle,
        })
    }
}

// ----------------------------------------------------------------------------
// Metric Patterns
// ----------------------------------------------------------------------------

enum MetricPattern {
    Exact(CompactString),
    Glob(Regex),
}

fn compile_metric_pattern(pattern: &str) -> Result<MetricPattern, TemplateError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(TemplateError::InvalidMetricPattern {
            pattern: pattern.to_string(),
            message: "empty pattern".to_string(),
        });
    }
    if !pattern.contains('*') {
        return Ok(MetricPattern::Exact(pattern.into()));
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map(MetricPattern::Glob)
        .map_err(|e| TemplateError::InvalidMetricPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

// ----------------------------------------------------------------------------
// Index
// ----------------------------------------------------------------------------

/// Compiled selection rules of all templates.
#[derive(Debug, Default)]
pub struct MatchIndex {
    templates: Vec<CompiledTemplate>,
    exact: AHashMap<CompactString, SmallVec<[usize; 2]>>,
    globs: Vec<(Regex, usize)>,
}

impl MatchIndex {
    /// Index without templates; every series falls through to autogen.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile templates in declared order. Fails on the first invalid
    /// template, naming it.
    pub fn compile(configs: &[ChartTemplateConfig]) -> Result<Self, ConfigError> {
        let mut index = Self::default();

        for (position, config) in configs.iter().enumerate() {
            let id = config.id.trim();
            if id.is_empty() {
                return Err(ConfigError::invalid_value(
                    format!("templates[{position}].id"),
                    "must not be empty",
                ));
            }
            if index.templates.iter().any(|t| t.id == id) {
                return Err(ConfigError::DuplicateTemplate {
                    template_id: id.to_string(),
                });
            }
            if config.metrics.is_empty() {
                return Err(ConfigError::invalid_value(
                    format!("templates.{id}.metrics"),
                    "at least one metric pattern is required",
                ));
            }

            let compiled = CompiledTemplate::compile(config)?;
            let slot = index.templates.len();

            for pattern in &config.metrics {
                match compile_metric_pattern(pattern).map_err(|e| ConfigError::template_compile(id, e))? {
                    MetricPattern::Exact(name) => {
                        let slots = index.exact.entry(name).or_default();
                        if !slots.contains(&slot) {
                            slots.push(slot);
                        }
                    }
                    MetricPattern::Glob(regex) => index.globs.push((regex, slot)),
                }
            }
            index.templates.push(compiled);
        }

        debug!(
            target: "chartengine::engine",
            templates = index.templates.len(),
            exact_names = index.exact.len(),
            globs = index.globs.len(),
            "Match index compiled"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn templates(&self) -> &[CompiledTemplate] {
        &self.templates
    }

    /// Candidate templates for a metric name, in declared order.
    pub fn candidates(&self, name: &str) -> SmallVec<[usize; 4]> {
        let mut slots: SmallVec<[usize; 4]> = SmallVec::new();
        if let Some(exact) = self.exact.get(name) {
            slots.extend(exact.iter().copied());
        }
        for (regex, slot) in &self.globs {
            if regex.is_match(name) {
                slots.push(*slot);
            }
        }
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Route a series through every matching template, in declared order.
    pub fn resolve(&self, series: &Series) -> Vec<RouteBinding> {
        let mut tags = None;
        self.candidates(&series.name)
            .into_iter()
            .filter_map(|slot| self.templates[slot].route(series, &mut tags))
            .collect()
    }
}
