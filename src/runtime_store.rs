// ============================================================================
// RUNTIME METRICS
// ============================================================================
// Self-monitoring of the engine. Every plan produces a `PlanSample`; the
// engine folds it into its cumulative `EngineStats` and forwards it to an
// optional `RuntimeStore`.
// ============================================================================

use std::fmt::Debug;

use parking_lot::Mutex;
use serde::Serialize;

use crate::build_seq::BuildSeqTransition;

// ----------------------------------------------------------------------------
// Samples & Stats
// ----------------------------------------------------------------------------

/// What happened during one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSample {
    pub build_seq: u64,
    pub transition: BuildSeqTransition,
    /// Whether cache and state mutations were applied
    pub trusted: bool,
    pub series_total: u64,
    /// Skipped by series selection or the selector override
    pub series_filtered: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub routes_template: u64,
    pub routes_autogen: u64,
    /// Series that produced no binding
    pub series_unmatched: u64,
    pub duplicates: u64,
    pub charts_created: u64,
    pub dimensions_created: u64,
    pub dimensions_evicted: u64,
    pub charts_expired: u64,
    pub dimensions_expired: u64,
    pub charts_active: u64,
    pub dimensions_active: u64,
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub plans: u64,
    pub untrusted_plans: u64,
    pub broken_transitions: u64,
    pub recovered_transitions: u64,
    pub series_seen: u64,
    pub series_filtered: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub routes: u64,
    pub duplicates: u64,
    pub charts_created: u64,
    pub dimensions_created: u64,
    pub removals: u64,
    pub template_reloads: u64,
}

impl EngineStats {
    pub fn record(&mut self, sample: &PlanSample) {
        self.plans += 1;
        if !sample.trusted {
            self.untrusted_plans += 1;
        }
        match sample.transition {
            BuildSeqTransition::Broken => self.broken_transitions += 1,
            BuildSeqTransition::Recovered => self.recovered_transitions += 1,
            BuildSeqTransition::None => {}
        }
        self.series_seen += sample.series_total;
        self.series_filtered += sample.series_filtered;
        self.cache_hits += sample.cache_hits;
        self.cache_misses += sample.cache_misses;
        self.routes += sample.routes_template + sample.routes_autogen;
        self.duplicates += sample.duplicates;
        self.charts_created += sample.charts_created;
        self.dimensions_created += sample.dimensions_created;
        self.removals += sample.dimensions_evicted + sample.charts_expired + sample.dimensions_expired;
    }

    /// Fraction of cache lookups that hit
    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Receives one sample per plan.
pub trait RuntimeStore: Send + Sync + Debug {
    fn record_plan(&self, sample: &PlanSample);
}

/// Keeps every sample in memory; used by replays and tests.
#[derive(Debug, Default)]
pub struct RecordingRuntimeStore {
    samples: Mutex<Vec<PlanSample>>,
}

impl RecordingRuntimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<PlanSample> {
        self.samples.lock().clone()
    }

    pub fn last(&self) -> Option<PlanSample> {
        self.samples.lock().last().cloned()
    }
}

impl RuntimeStore for RecordingRuntimeStore {
    fn record_plan(&self, sample: &PlanSample) {
        self.samples.lock().push(sample.clone());
    }
}

// ----------------------------------------------------------------------------
// Prometheus Store
// ----------------------------------------------------------------------------

#[cfg(feature = "prometheus-store")]
pub use self::prometheus_store::PrometheusRuntimeStore;

#[cfg(feature = "prometheus-store")]
mod prometheus_store {
    use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

    use super::{PlanSample, RuntimeStore};
    use crate::build_seq::BuildSeqTransition;
    use crate::error::{EngineError, EngineResult};

    /// Exposes plan samples as Prometheus metrics.
    #[derive(Clone)]
    pub struct PrometheusRuntimeStore {
        plans: IntCounterVec,
        series: IntCounterVec,
        cache: IntCounterVec,
        routes: IntCounterVec,
        removals: IntCounterVec,
        transitions: IntCounterVec,
        duplicates: IntCounter,
        charts: IntGauge,
        dimensions: IntGauge,
    }

    impl std::fmt::Debug for PrometheusRuntimeStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PrometheusRuntimeStore").finish_non_exhaustive()
        }
    }

    fn store_error(e: prometheus::Error) -> EngineError {
        EngineError::RuntimeStore(e.to_string())
    }

    impl PrometheusRuntimeStore {
        /// Create the metrics under `namespace` and register them.
        pub fn new(registry: &Registry, namespace: &str) -> EngineResult<Self> {
            let counter_vec = |name: &str, help: &str, labels: &[&str]| {
                IntCounterVec::new(Opts::new(name, help).namespace(namespace), labels).map_err(store_error)
            };

            let store = Self {
                plans: counter_vec("plans_total", "Plans executed, by trust", &["trusted"])?,
                series: counter_vec("series_total", "Series processed, by outcome", &["outcome"])?,
                cache: counter_vec("route_cache_lookups_total", "Route cache lookups", &["result"])?,
                routes: counter_vec("routes_total", "Route bindings planned, by origin", &["origin"])?,
                removals: counter_vec("removals_total", "Removal instructions, by reason", &["reason"])?,
                transitions: counter_vec(
                    "build_seq_transitions_total",
                    "Build sequence guard transitions",
                    &["transition"],
                )?,
                duplicates: IntCounter::with_opts(
                    Opts::new("duplicate_routes_total", "Routes dropped as same-cycle duplicates")
                        .namespace(namespace),
                )
                .map_err(store_error)?,
                charts: IntGauge::with_opts(
                    Opts::new("charts_active", "Materialized charts").namespace(namespace),
                )
                .map_err(store_error)?,
                dimensions: IntGauge::with_opts(
                    Opts::new("dimensions_active", "Materialized dimensions").namespace(namespace),
                )
                .map_err(store_error)?,
            };

            registry.register(Box::new(store.plans.clone())).map_err(store_error)?;
            registry.register(Box::new(store.series.clone())).map_err(store_error)?;
            registry.register(Box::new(store.cache.clone())).map_err(store_error)?;
            registry.register(Box::new(store.routes.clone())).map_err(store_error)?;
            registry.register(Box::new(store.removals.clone())).map_err(store_error)?;
            registry.register(Box::new(store.transitions.clone())).map_err(store_error)?;
            registry.register(Box::new(store.duplicates.clone())).map_err(store_error)?;
            registry.register(Box::new(store.charts.clone())).map_err(store_error)?;
            registry.register(Box::new(store.dimensions.clone())).map_err(store_error)?;

            Ok(store)
        }
    }

    impl RuntimeStore for PrometheusRuntimeStore {
        fn record_plan(&self, sample: &PlanSample) {
            let trusted = if sample.trusted { "true" } else { "false" };
            self.plans.with_label_values(&[trusted]).inc();

            let routed = sample
                .series_total
                .saturating_sub(sample.series_filtered + sample.series_unmatched);
            self.series.with_label_values(&["routed"]).inc_by(routed);
            self.series.with_label_values(&["filtered"]).inc_by(sample.series_filtered);
            self.series.with_label_values(&["unmatched"]).inc_by(sample.series_unmatched);

            self.cache.with_label_values(&["hit"]).inc_by(sample.cache_hits);
            self.cache.with_label_values(&["miss"]).inc_by(sample.cache_misses);

            self.routes.with_label_values(&["template"]).inc_by(sample.routes_template);
            self.routes.with_label_values(&["autogen"]).inc_by(sample.routes_autogen);

            self.removals.with_label_values(&["cap"]).inc_by(sample.dimensions_evicted);
            self.removals.with_label_values(&["chart_expiry"]).inc_by(sample.charts_expired);
            self.removals.with_label_values(&["dimension_expiry"]).inc_by(sample.dimensions_expired);

            match sample.transition {
                BuildSeqTransition::Broken => self.transitions.with_label_values(&["broken"]).inc(),
                BuildSeqTransition::Recovered => self.transitions.with_label_values(&["recovered"]).inc(),
                BuildSeqTransition::None => {}
            }

            self.duplicates.inc_by(sample.duplicates);
            self.charts.set(i64::try_from(sample.charts_active).unwrap_or(i64::MAX));
            self.dimensions.set(i64::try_from(sample.dimensions_active).unwrap_or(i64::MAX));
        }
    }
}
