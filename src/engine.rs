// ============================================================================
// ENGINE
// ============================================================================
// Per-job orchestration of one build cycle:
//
//   1. observe the build sequence; a regression makes the cycle untrusted
//   2. filter series (series selection, selector override)
//   3. route each series: cache -> match index -> autogen
//   4. dedupe (chart, dimension) claims within the build
//   5. trusted cycles only: materialize, cap eviction, expiry, cache prune
//
// An engine is owned by a single job thread and is never shared.
// ============================================================================

use std::sync::Arc;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::autogen::{self, AutogenPolicy};
use crate::build_seq::{BuildSeqGuard, BuildSeqTransition, PlannerMode};
use crate::config::ChartTemplateConfig;
use crate::error::EngineResult;
use crate::lifecycle::{collect_expiry_removals, enforce_lifecycle_caps, Removals};
use crate::match_index::MatchIndex;
use crate::route::{RouteBinding, RouteOrigin};
use crate::route_cache::{CacheBucket, RouteCache};
use crate::runtime_store::{EngineStats, PlanSample, RuntimeStore};
use crate::selector::{parse_selector, Selector};
use crate::series::{Series, SeriesIdentity};
use crate::state::{BuildScratch, Claim, MaterializedState};

// ----------------------------------------------------------------------------
// Options
// ----------------------------------------------------------------------------

/// Which supplied series a plan considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesSelection {
    /// Skip series whose own write sequence is known and is not the current build
    #[default]
    LastSuccessOnly,
    /// Plan every supplied series
    AllVisible,
}

/// Matching and materialization policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Filters series before routing. `None` means no override; an empty
    /// expression overrides to allow everything.
    pub selector: Option<String>,
    /// Unmatched-series fallback; `None` keeps autogen disabled
    pub autogen: Option<AutogenPolicy>,
}

/// Construction-time engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    policy: EnginePolicy,
    templates: Vec<ChartTemplateConfig>,
    runtime_store: Option<Arc<dyn RuntimeStore>>,
    series_selection: SeriesSelection,
    planner_mode: PlannerMode,
    type_id_prefix: CompactString,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_templates(mut self, templates: Vec<ChartTemplateConfig>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_runtime_store(mut self, store: Arc<dyn RuntimeStore>) -> Self {
        self.runtime_store = Some(store);
        self
    }

    /// Plan every visible series instead of only those written in the
    /// current build. Intended for runtime/internal stores.
    pub fn series_selection_all_visible(mut self) -> Self {
        self.series_selection = SeriesSelection::AllVisible;
        self
    }

    pub fn with_series_selection(mut self, selection: SeriesSelection) -> Self {
        self.series_selection = selection;
        self
    }

    /// Tolerate repeated build sequences and dedupe per plan call.
    pub fn runtime_planner_mode(mut self) -> Self {
        self.planner_mode = PlannerMode::Runtime;
        self
    }

    pub fn with_planner_mode(mut self, mode: PlannerMode) -> Self {
        self.planner_mode = mode;
        self
    }

    /// Prefix used for autogen type-ID budget checks, usually the job name.
    pub fn emit_type_id_budget_prefix(mut self, prefix: impl Into<CompactString>) -> Self {
        self.type_id_prefix = prefix.into();
        self
    }
}

// ----------------------------------------------------------------------------
// Plan Output
// ----------------------------------------------------------------------------

/// One binding the job runtime must feed this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRoute {
    pub series: SeriesIdentity,
    pub binding: RouteBinding,
    /// The chart does not exist yet; emit its creation
    pub new_chart: bool,
    /// The dimension does not exist yet; emit its creation
    pub new_dimension: bool,
}

/// Result of one build cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub build_seq: u64,
    pub transition: BuildSeqTransition,
    /// Whether state, cache and lifecycle were updated
    pub trusted: bool,
    pub routes: Vec<PlannedRoute>,
    pub removals: Removals,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Engine {
    autogen: AutogenPolicy,
    selector: Option<Selector>,
    series_selection: SeriesSelection,
    type_id_prefix: CompactString,

    match_index: MatchIndex,
    template_revision: u64,

    route_cache: RouteCache,
    cache_bucket: CacheBucket,
    recovery_epoch: u64,

    materialized: MaterializedState,
    scratch: BuildScratch,
    guard: BuildSeqGuard,
    plan_seq: u64,

    stats: EngineStats,
    runtime_store: Option<Arc<dyn RuntimeStore>>,
}

impl Engine {
    /// Build an engine. Invalid policy or templates fail here, before any cycle.
    pub fn new(options: EngineOptions) -> EngineResult<Self> {
        let autogen = options
            .policy
            .autogen
            .map(AutogenPolicy::normalize)
            .transpose()?
            .unwrap_or_default();

        let selector = match options.policy.selector.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(expr) => Some(parse_selector(expr)?),
        };

        let match_index = MatchIndex::compile(&options.templates)?;

        info!(
            target: "chartengine::engine",
            templates = match_index.len(),
            autogen = autogen.enabled,
            max_type_id_len = autogen.max_type_id_len,
            mode = ?options.planner_mode,
            selection = ?options.series_selection,
            "Chart engine initialized"
        );

        Ok(Self {
            autogen,
            selector,
            series_selection: options.series_selection,
            type_id_prefix: options.type_id_prefix,
            match_index,
            template_revision: 0,
            route_cache: RouteCache::new(),
            cache_bucket: CacheBucket::Unbucketed,
            recovery_epoch: 0,
            materialized: MaterializedState::new(),
            scratch: BuildScratch::new(),
            guard: BuildSeqGuard::new(options.planner_mode),
            plan_seq: 0,
            stats: EngineStats::default(),
            runtime_store: options.runtime_store,
        })
    }

    /// Replace the template set. On error the previous templates stay active.
    pub fn reload_templates(&mut self, templates: &[ChartTemplateConfig]) -> EngineResult<()> {
        let index = MatchIndex::compile(templates)?;
        self.match_index = index;
        self.template_revision += 1;
        self.stats.template_reloads += 1;

        info!(
            target: "chartengine::engine",
            templates = self.match_index.len(),
            revision = self.template_revision,
            "Templates reloaded"
        );
        Ok(())
    }

    /// Plan one build cycle.
    pub fn plan(&mut self, series: &[Series], build_seq: u64) -> Plan {
        self.plan_seq += 1;
        let plan_seq = self.plan_seq;

        let observation = self.guard.observe(build_seq);
        match observation.transition {
            BuildSeqTransition::Broken => warn!(
                target: "chartengine::engine",
                build_seq,
                previous = observation.previous,
                "Build sequence regressed, cycle not trusted"
            ),
            BuildSeqTransition::Recovered => {
                // Runtime mode can recover to the same sequence more than once.
                self.recovery_epoch += 1;
                self.cache_bucket = CacheBucket::Bucket(self.recovery_epoch);
                info!(
                    target: "chartengine::engine",
                    build_seq,
                    previous = observation.previous,
                    epoch = self.recovery_epoch,
                    "Build sequence recovered"
                );
            }
            BuildSeqTransition::None => {}
        }
        let trusted = !self.guard.is_violating();

        let dedupe_seq = match self.guard.mode() {
            PlannerMode::Collector => build_seq,
            PlannerMode::Runtime => plan_seq,
        };
        self.scratch.begin(dedupe_seq);

        let mut sample = PlanSample {
            build_seq,
            transition: observation.transition,
            trusted,
            series_total: series.len() as u64,
            ..PlanSample::default()
        };
        let mut routes = Vec::with_capacity(series.len());

        for s in series {
            if !self.is_selected(s, build_seq) {
                sample.series_filtered += 1;
                continue;
            }

            let bindings = self.route_series(s, trusted, &mut sample);
            if trusted {
                self.route_cache.mark_seen_if_present(&s.identity, plan_seq);
            }
            if bindings.is_empty() {
                sample.series_unmatched += 1;
                continue;
            }

            for binding in bindings.iter() {
                self.claim_route(s, binding, &mut routes, &mut sample);
            }
        }

        let removals = if trusted {
            self.apply(build_seq, plan_seq, &routes, &mut sample)
        } else {
            Removals::default()
        };

        sample.charts_active = self.materialized.chart_count() as u64;
        sample.dimensions_active = self.materialized.dimension_count() as u64;
        self.stats.record(&sample);
        if let Some(store) = &self.runtime_store {
            store.record_plan(&sample);
        }

        debug!(
            target: "chartengine::engine",
            build_seq,
            plan_seq,
            trusted,
            series = sample.series_total,
            routes = routes.len(),
            cache_hits = sample.cache_hits,
            removals = removals.len(),
            "Plan complete"
        );

        Plan {
            build_seq,
            transition: observation.transition,
            trusted,
            routes,
            removals,
        }
    }

    fn is_selected(&self, series: &Series, build_seq: u64) -> bool {
        if self.series_selection == SeriesSelection::LastSuccessOnly
            && series.seen_seq.is_some_and(|seen| seen != build_seq)
        {
            return false;
        }
        match &self.selector {
            Some(selector) => selector.matches(&series.tags()),
            None => true,
        }
    }

    fn route_series(&mut self, series: &Series, trusted: bool, sample: &mut PlanSample) -> Arc<[RouteBinding]> {
        if let Some(bindings) = self
            .route_cache
            .lookup(&series.identity, self.template_revision, self.cache_bucket)
        {
            sample.cache_hits += 1;
            return bindings;
        }
        sample.cache_misses += 1;

        let mut bindings = self.match_index.resolve(series);
        if bindings.is_empty() {
            if let Some(binding) = autogen::synthesize(
                &series.name,
                &series.labels,
                series.meta,
                &self.autogen,
                &self.type_id_prefix,
            ) {
                bindings.push(binding);
            }
        }
        if bindings.is_empty() {
            trace!(target: "chartengine::engine", series = %series.identity, "No route");
        }

        let bindings: Arc<[RouteBinding]> = bindings.into();
        if trusted {
            self.route_cache.store(
                &series.identity,
                self.template_revision,
                self.cache_bucket,
                Arc::clone(&bindings),
            );
        }
        bindings
    }

    fn claim_route(
        &mut self,
        series: &Series,
        binding: &RouteBinding,
        routes: &mut Vec<PlannedRoute>,
        sample: &mut PlanSample,
    ) {
        let first_for_chart = match self
            .scratch
            .claim(&binding.chart_id, &binding.dimension_name, series.identity.hash64)
        {
            Claim::Claimed { first_for_chart } => first_for_chart,
            Claim::Duplicate => {
                sample.duplicates += 1;
                trace!(
                    target: "chartengine::engine",
                    series = %series.identity,
                    route = %binding,
                    "Duplicate route in build dropped"
                );
                return;
            }
        };

        match binding.origin {
            RouteOrigin::Template => sample.routes_template += 1,
            RouteOrigin::Autogen => sample.routes_autogen += 1,
        }

        routes.push(PlannedRoute {
            series: series.identity.clone(),
            binding: binding.clone(),
            new_chart: first_for_chart && !self.materialized.contains_chart(&binding.chart_id),
            new_dimension: !self
                .materialized
                .contains_dimension(&binding.chart_id, &binding.dimension_name),
        });
    }

    // Materialize the cycle's routes, then run both lifecycle passes and
    // prune the route cache.
    fn apply(&mut self, build_seq: u64, plan_seq: u64, routes: &[PlannedRoute], sample: &mut PlanSample) -> Removals {
        for route in routes {
            let (chart, chart_created) = self.materialized.ensure_chart(&route.binding);
            chart.touch(build_seq);
            let (dimension, dimension_created) = chart.ensure_dimension(&route.binding);
            dimension.touch(build_seq);

            sample.charts_created += u64::from(chart_created);
            sample.dimensions_created += u64::from(dimension_created);
        }

        let evicted = enforce_lifecycle_caps(build_seq, &self.scratch, &mut self.materialized);
        let expired = collect_expiry_removals(build_seq, &mut self.materialized);

        sample.dimensions_evicted = evicted.len() as u64;
        sample.charts_expired = expired.charts.len() as u64;
        sample.dimensions_expired = expired.dimensions.len() as u64;

        if !evicted.is_empty() || !expired.is_empty() {
            debug!(
                target: "chartengine::lifecycle",
                build_seq,
                evicted = evicted.len(),
                charts_expired = expired.charts.len(),
                dimensions_expired = expired.dimensions.len(),
                "Lifecycle removals"
            );
        }

        self.route_cache.retain_seen(plan_seq);

        let mut removals = Removals {
            dimensions: evicted,
            charts: Vec::new(),
        };
        removals.extend(expired);
        removals
    }

    // ---- Accessors ----

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn materialized(&self) -> &MaterializedState {
        &self.materialized
    }

    pub fn template_revision(&self) -> u64 {
        self.template_revision
    }

    pub fn cache_len(&self) -> usize {
        self.route_cache.len()
    }

    pub fn cache_bucket(&self) -> CacheBucket {
        self.cache_bucket
    }

    pub fn is_violating(&self) -> bool {
        self.guard.is_violating()
    }

    pub fn autogen_policy(&self) -> &AutogenPolicy {
        &self.autogen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DimensionConfig, LifecycleConfig};
    use crate::error::EngineError;
    use crate::runtime_store::RecordingRuntimeStore;
    use crate::series::{LabelSet, SeriesMeta};
    use pretty_assertions::assert_eq;

    fn counter(name: &str, pairs: &[(&str, &str)]) -> Series {
        Series::new(name, LabelSet::from_pairs(pairs.iter().copied()), SeriesMeta::counter())
    }

    fn template(id: &str, chart_id: &str, metrics: &[&str]) -> ChartTemplateConfig {
        ChartTemplateConfig {
            id: id.to_string(),
            chart_id: chart_id.to_string(),
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            ..ChartTemplateConfig::default()
        }
    }

    fn autogen_engine() -> Engine {
        Engine::new(EngineOptions::new().with_policy(EnginePolicy {
            autogen: Some(AutogenPolicy::enabled()),
            ..EnginePolicy::default()
        }))
        .unwrap()
    }

    fn chart_ids(plan: &Plan) -> Vec<&str> {
        plan.routes.iter().map(|r| r.binding.chart_id.as_str()).collect()
    }

    #[test]
    fn test_autogen_route_materializes_and_caches() {
        let mut engine = autogen_engine();
        let series = vec![counter("svc.requests_total", &[("instance", "db1"), ("job", "mysql")])];

        let plan = engine.plan(&series, 1);
        assert!(plan.trusted);
        assert_eq!(chart_ids(&plan), vec!["svc.requests_total-instance=db1-job=mysql"]);
        assert!(plan.routes[0].new_chart);
        assert!(plan.routes[0].new_dimension);
        assert!(engine.materialized().contains_chart("svc.requests_total-instance=db1-job=mysql"));

        let plan = engine.plan(&series, 2);
        assert!(!plan.routes[0].new_chart);
        assert!(!plan.routes[0].new_dimension);
        assert_eq!(engine.stats().cache_hits, 1);
        assert_eq!(engine.stats().cache_misses, 1);
        assert_eq!(engine.cache_len(), 1);
    }

    #[test]
    fn test_templates_take_priority_over_autogen() {
        let mut engine = Engine::new(
            EngineOptions::new()
                .with_templates(vec![template("queries", "mysql_queries", &["mysql.queries"])])
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy::enabled()),
                    ..EnginePolicy::default()
                }),
        )
        .unwrap();

        let plan = engine.plan(&[counter("mysql.queries", &[]), counter("mysql.slow", &[])], 1);
        assert_eq!(chart_ids(&plan), vec!["mysql_queries", "mysql.slow"]);
        assert_eq!(plan.routes[0].binding.origin, RouteOrigin::Template);
        assert_eq!(plan.routes[1].binding.origin, RouteOrigin::Autogen);
    }

    #[test]
    fn test_unmatched_series_dropped_without_autogen() {
        let mut engine = Engine::new(EngineOptions::new()).unwrap();
        let plan = engine.plan(&[counter("svc.requests_total", &[])], 1);

        assert!(plan.routes.is_empty());
        assert!(engine.materialized().is_empty());
        // Negative entry cached.
        assert_eq!(engine.cache_len(), 1);
    }

    #[test]
    fn test_selector_override() {
        let options = |selector: Option<&str>| {
            EngineOptions::new().with_policy(EnginePolicy {
                selector: selector.map(str::to_string),
                autogen: Some(AutogenPolicy::enabled()),
            })
        };
        let series = vec![
            counter("a_total", &[("env", "prod")]),
            counter("b_total", &[("env", "dev")]),
        ];

        let mut engine = Engine::new(options(Some("env=prod"))).unwrap();
        let plan = engine.plan(&series, 1);
        assert_eq!(chart_ids(&plan), vec!["a_total-env=prod"]);
        assert_eq!(engine.stats().series_filtered, 1);

        let mut engine = Engine::new(options(Some(""))).unwrap();
        assert_eq!(engine.plan(&series, 1).routes.len(), 2);

        let err = Engine::new(options(Some("a!b"))).unwrap_err();
        assert!(matches!(err, EngineError::Selector(_)));
    }

    #[test]
    fn test_invalid_autogen_budget_rejected() {
        let err = Engine::new(EngineOptions::new().with_policy(EnginePolicy {
            autogen: Some(AutogenPolicy {
                max_type_id_len: 3,
                ..AutogenPolicy::enabled()
            }),
            ..EnginePolicy::default()
        }))
        .unwrap_err();
        assert_eq!(err.category(), "config");

        let engine = Engine::new(EngineOptions::new().with_policy(EnginePolicy {
            autogen: Some(AutogenPolicy {
                max_type_id_len: 0,
                ..AutogenPolicy::enabled()
            }),
            ..EnginePolicy::default()
        }))
        .unwrap();
        assert_eq!(engine.autogen_policy().max_type_id_len, autogen::DEFAULT_MAX_TYPE_ID_LEN);
    }

    #[test]
    fn test_type_id_prefix_counts_against_budget() {
        let mut engine = Engine::new(
            EngineOptions::new()
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy {
                        max_type_id_len: 10,
                        ..AutogenPolicy::enabled()
                    }),
                    ..EnginePolicy::default()
                })
                .emit_type_id_budget_prefix("job"),
        )
        .unwrap();

        let plan = engine.plan(&[counter("short", &[]), counter("too_long", &[])], 1);
        assert_eq!(chart_ids(&plan), vec!["short"]);
    }

    #[test]
    fn test_series_selection_modes() {
        let series = vec![
            counter("fresh_total", &[]).with_seen_seq(5),
            counter("stale_total", &[]).with_seen_seq(4),
            counter("unknown_total", &[]),
        ];

        let mut engine = autogen_engine();
        assert_eq!(chart_ids(&engine.plan(&series, 5)), vec!["fresh_total", "unknown_total"]);

        let mut engine = Engine::new(
            EngineOptions::new()
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy::enabled()),
                    ..EnginePolicy::default()
                })
                .series_selection_all_visible(),
        )
        .unwrap();
        assert_eq!(engine.plan(&series, 5).routes.len(), 3);
    }

    #[test]
    fn test_broken_cycle_does_not_mutate_state_or_cache() {
        let mut engine = autogen_engine();
        engine.plan(&[counter("a_total", &[])], 10);

        // Duplicate tick in collector mode breaks the sequence.
        let plan = engine.plan(&[counter("a_total", &[]), counter("b_total", &[])], 10);
        assert_eq!(plan.transition, BuildSeqTransition::Broken);
        assert!(!plan.trusted);
        assert_eq!(chart_ids(&plan), vec!["a_total", "b_total"]);
        assert!(plan.routes[1].new_chart);
        assert!(!engine.materialized().contains_chart("b_total"));
        assert_eq!(engine.cache_len(), 1);

        let plan = engine.plan(&[counter("a_total", &[])], 9);
        assert_eq!(plan.transition, BuildSeqTransition::None);
        assert!(!plan.trusted);

        let misses_before = engine.stats().cache_misses;
        let plan = engine.plan(&[counter("a_total", &[])], 11);
        assert_eq!(plan.transition, BuildSeqTransition::Recovered);
        assert!(plan.trusted);
        assert_eq!(engine.cache_bucket(), CacheBucket::Bucket(1));
        // Recovery rebuckets the cache, so the old entry misses.
        assert_eq!(engine.stats().cache_misses, misses_before + 1);
        assert_eq!(engine.stats().broken_transitions, 1);
        assert_eq!(engine.stats().recovered_transitions, 1);
    }

    #[test]
    fn test_runtime_mode_tolerates_repeated_sequence() {
        let mut engine = Engine::new(
            EngineOptions::new()
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy::enabled()),
                    ..EnginePolicy::default()
                })
                .runtime_planner_mode(),
        )
        .unwrap();

        engine.plan(&[counter("a_total", &[])], 10);
        let plan = engine.plan(&[counter("a_total", &[])], 10);
        assert_eq!(plan.transition, BuildSeqTransition::None);
        assert!(plan.trusted);
        assert_eq!(plan.routes.len(), 1);
    }

    #[test]
    fn test_runtime_mode_repeated_recovery_invalidates_cache() {
        let mut engine = Engine::new(
            EngineOptions::new()
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy::enabled()),
                    ..EnginePolicy::default()
                })
                .runtime_planner_mode(),
        )
        .unwrap();
        let series = vec![counter("a_total", &[])];

        let mut transitions = Vec::new();
        let mut misses = Vec::new();
        for seq in [10, 9, 10, 10, 9, 10] {
            transitions.push(engine.plan(&series, seq).transition);
            misses.push(engine.stats().cache_misses);
        }

        assert_eq!(
            transitions,
            vec![
                BuildSeqTransition::None,
                BuildSeqTransition::Broken,
                BuildSeqTransition::Recovered,
                BuildSeqTransition::None,
                BuildSeqTransition::Broken,
                BuildSeqTransition::Recovered,
            ]
        );
        // Each recovery starts a fresh bucket, even at the same sequence.
        assert_eq!(misses, vec![1, 1, 2, 2, 2, 3]);
        assert_eq!(engine.cache_bucket(), CacheBucket::Bucket(2));
    }

    #[test]
    fn test_same_cycle_duplicates_dropped() {
        let mut engine = Engine::new(EngineOptions::new().with_templates(vec![ChartTemplateConfig {
            dimension: DimensionConfig {
                name: Some("total".to_string()),
                ..DimensionConfig::default()
            },
            ..template("t", "requests", &["http.requests"])
        }]))
        .unwrap();

        let plan = engine.plan(
            &[
                counter("http.requests", &[("pod", "a")]),
                counter("http.requests", &[("pod", "b")]),
            ],
            1,
        );
        assert_eq!(plan.routes.len(), 1);
        assert_eq!(plan.routes[0].series.id.as_str(), r#"http.requests{pod="a"}"#);
        assert_eq!(engine.stats().duplicates, 1);
    }

    #[test]
    fn test_reload_templates_invalidates_cache() {
        let mut engine = Engine::new(
            EngineOptions::new().with_templates(vec![template("t", "old_chart", &["m"])]),
        )
        .unwrap();
        let series = vec![counter("m", &[])];

        assert_eq!(chart_ids(&engine.plan(&series, 1)), vec!["old_chart"]);

        engine
            .reload_templates(&[template("t", "new_chart", &["m"])])
            .unwrap();
        assert_eq!(engine.template_revision(), 1);
        assert_eq!(chart_ids(&engine.plan(&series, 2)), vec!["new_chart"]);
        assert_eq!(engine.stats().cache_misses, 2);

        assert!(engine.reload_templates(&[template("t", " ", &["m"])]).is_err());
        assert_eq!(engine.template_revision(), 1);
        assert_eq!(chart_ids(&engine.plan(&series, 3)), vec!["new_chart"]);
    }

    #[test]
    fn test_cap_eviction_through_engine() {
        let mut engine = Engine::new(EngineOptions::new().with_templates(vec![ChartTemplateConfig {
            dimension: DimensionConfig {
                from_label: Some("cmd".to_string()),
                ..DimensionConfig::default()
            },
            lifecycle: LifecycleConfig {
                max_dims: 2,
                ..LifecycleConfig::default()
            },
            ..template("cmds", "redis_commands", &["redis.commands_total"])
        }]))
        .unwrap();

        engine.plan(
            &[
                counter("redis.commands_total", &[("cmd", "get")]),
                counter("redis.commands_total", &[("cmd", "set")]),
            ],
            1,
        );
        let plan = engine.plan(&[counter("redis.commands_total", &[("cmd", "del")])], 2);

        assert!(plan.routes[0].new_dimension);
        assert!(!plan.routes[0].new_chart);
        assert_eq!(plan.removals.dimensions.len(), 1);
        assert_eq!(plan.removals.dimensions[0].name, "get");

        let chart = engine.materialized().chart("redis_commands").unwrap();
        assert_eq!(chart.dimension_count(), 2);
        assert!(chart.dimension("del").is_some());
    }

    #[test]
    fn test_chart_expiry_through_engine() {
        let mut engine = Engine::new(EngineOptions::new().with_templates(vec![ChartTemplateConfig {
            lifecycle: LifecycleConfig {
                expire_after_cycles: 2,
                ..LifecycleConfig::default()
            },
            ..template("t", "chart", &["m"])
        }]))
        .unwrap();

        engine.plan(&[counter("m", &[])], 1);
        assert!(engine.plan(&[], 2).removals.is_empty());
        assert!(engine.plan(&[], 3).removals.is_empty());

        let plan = engine.plan(&[], 4);
        assert_eq!(plan.removals.charts.len(), 1);
        assert_eq!(plan.removals.charts[0].chart_id, "chart");
        assert!(engine.materialized().is_empty());
        // Unseen cache entries were pruned along the way.
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_runtime_store_receives_samples() {
        let store = Arc::new(RecordingRuntimeStore::new());
        let mut engine = Engine::new(
            EngineOptions::new()
                .with_policy(EnginePolicy {
                    autogen: Some(AutogenPolicy::enabled()),
                    ..EnginePolicy::default()
                })
                .with_runtime_store(store.clone()),
        )
        .unwrap();

        engine.plan(&[counter("a_total", &[]), counter("b_total", &[])], 1);

        let sample = store.last().unwrap();
        assert_eq!(sample.series_total, 2);
        assert_eq!(sample.routes_autogen, 2);
        assert_eq!(sample.charts_created, 2);
        assert_eq!(sample.charts_active, 2);
        assert!(sample.trusted);
    }
}
