// ============================================================================
// MATERIALIZED STATE
// ============================================================================
// Durable record of the charts and dimensions that currently exist, keyed by
// chart ID, plus the per-build scratch used for same-cycle dedupe. Entities
// are created lazily on their first trusted route and only disappear through
// the lifecycle passes or explicit removal.
// ============================================================================

use std::sync::Arc;

use ahash::AHashMap;
use compact_str::CompactString;

use crate::route::RouteBinding;
use crate::template::{Algorithm, ChartMeta, LifecyclePolicy};

// ----------------------------------------------------------------------------
// Durable State
// ----------------------------------------------------------------------------

/// One materialized dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionState {
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
    pub static_dimension: bool,
    /// Creation order within the chart
    pub order: u64,
    pub last_seen_success_seq: u64,
}

/// One materialized chart.
#[derive(Debug, Clone)]
pub struct ChartState {
    pub template_id: Option<CompactString>,
    pub meta: Arc<ChartMeta>,
    /// Fixed on creation
    pub lifecycle: LifecyclePolicy,
    pub dimensions: AHashMap<CompactString, DimensionState>,
    pub last_seen_success_seq: u64,
    next_order: u64,
}

impl ChartState {
    fn new(binding: &RouteBinding) -> Self {
        Self {
            template_id: binding.template_id.clone(),
            meta: Arc::clone(&binding.chart),
            lifecycle: binding.lifecycle,
            dimensions: AHashMap::new(),
            last_seen_success_seq: 0,
            next_order: 0,
        }
    }

    /// Get or create the dimension a binding feeds. Returns `true` when created.
    pub fn ensure_dimension(&mut self, binding: &RouteBinding) -> (&mut DimensionState, bool) {
        let mut created = false;
        let next_order = &mut self.next_order;
        let dimension = self
            .dimensions
            .entry(binding.dimension_name.clone())
            .or_insert_with(|| {
                created = true;
                let order = *next_order;
                *next_order += 1;
                DimensionState {
                    algorithm: binding.algorithm,
                    multiplier: binding.multiplier,
                    divisor: binding.divisor,
                    hidden: binding.hidden,
                    static_dimension: binding.static_dimension,
                    order,
                    last_seen_success_seq: 0,
                }
            });
        (dimension, created)
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionState> {
        self.dimensions.get(name)
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Record a sighting; last-seen values never move backwards.
    pub fn touch(&mut self, seq: u64) {
        self.last_seen_success_seq = self.last_seen_success_seq.max(seq);
    }
}

impl DimensionState {
    pub fn touch(&mut self, seq: u64) {
        self.last_seen_success_seq = self.last_seen_success_seq.max(seq);
    }
}

/// Charts and dimensions that currently exist.
#[derive(Debug, Default)]
pub struct MaterializedState {
    charts: AHashMap<CompactString, ChartState>,
}

impl MaterializedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the chart a binding feeds. Returns `true` when created.
    pub fn ensure_chart(&mut self, binding: &RouteBinding) -> (&mut ChartState, bool) {
        let mut created = false;
        let chart = self
            .charts
            .entry(binding.chart_id.clone())
            .or_insert_with(|| {
                created = true;
                ChartState::new(binding)
            });
        (chart, created)
    }

    pub fn chart(&self, chart_id: &str) -> Option<&ChartState> {
        self.charts.get(chart_id)
    }

    pub fn chart_mut(&mut self, chart_id: &str) -> Option<&mut ChartState> {
        self.charts.get_mut(chart_id)
    }

    pub fn contains_chart(&self, chart_id: &str) -> bool {
        self.charts.contains_key(chart_id)
    }

    pub fn contains_dimension(&self, chart_id: &str, name: &str) -> bool {
        self.charts
            .get(chart_id)
            .is_some_and(|c| c.dimensions.contains_key(name))
    }

    pub fn remove_chart(&mut self, chart_id: &str) -> Option<ChartState> {
        self.charts.remove(chart_id)
    }

    pub fn remove_dimension(&mut self, chart_id: &str, name: &str) -> Option<DimensionState> {
        self.charts.get_mut(chart_id)?.dimensions.remove(name)
    }

    pub fn charts(&self) -> impl Iterator<Item = (&str, &ChartState)> + '_ {
        self.charts.iter().map(|(id, chart)| (id.as_str(), chart))
    }

    pub(crate) fn charts_mut(&mut self) -> impl Iterator<Item = (&CompactString, &mut ChartState)> + '_ {
        self.charts.iter_mut()
    }

    pub fn chart_count(&self) -> usize {
        self.charts.len()
    }

    pub fn dimension_count(&self) -> usize {
        self.charts.values().map(ChartState::dimension_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Per-Build Scratch
// ----------------------------------------------------------------------------

/// A dimension claimed during the current build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimBuildEntry {
    pub seen_seq: u64,
    /// Hash of the series that claimed the dimension
    pub series_hash: u64,
}

/// Dimensions claimed for one chart during the current build.
#[derive(Debug, Clone, Default)]
pub struct ChartBuild {
    pub entries: AHashMap<CompactString, DimBuildEntry>,
}

impl ChartBuild {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// Outcome of claiming a `(chart, dimension)` pair in the current build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First claim; `first_for_chart` is set for the first dimension of the chart
    Claimed { first_for_chart: bool },
    /// Another series already feeds this dimension in this build
    Duplicate,
}

/// Same-cycle dedupe bookkeeping.
#[derive(Debug, Default)]
pub struct BuildScratch {
    seq: u64,
    charts: AHashMap<CompactString, ChartBuild>,
}

impl BuildScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new build keyed by `seq`, dropping the previous build's claims.
    pub fn begin(&mut self, seq: u64) {
        self.seq = seq;
        self.charts.clear();
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn claim(&mut self, chart_id: &str, dimension: &str, series_hash: u64) -> Claim {
        let seq = self.seq;
        let first_for_chart = !self.charts.contains_key(chart_id);
        let chart = self.charts.entry(chart_id.into()).or_default();

        match chart.entries.get(dimension) {
            Some(entry) if entry.seen_seq == seq => Claim::Duplicate,
            _ => {
                chart.entries.insert(
                    dimension.into(),
                    DimBuildEntry {
                        seen_seq: seq,
                        series_hash,
                    },
                );
                Claim::Claimed { first_for_chart }
            }
        }
    }

    pub fn chart(&self, chart_id: &str) -> Option<&ChartBuild> {
        self.charts.get(chart_id)
    }

    pub fn charts(&self) -> impl Iterator<Item = (&str, &ChartBuild)> + '_ {
        self.charts.iter().map(|(id, build)| (id.as_str(), build))
    }

    /// Insert a claim directly; used to stage builds in lifecycle tests.
    #[cfg(test)]
    pub(crate) fn stage(&mut self, chart_id: &str, dimension: &str) {
        let seq = self.seq;
        self.charts.entry(chart_id.into()).or_default().entries.insert(
            dimension.into(),
            DimBuildEntry {
                seen_seq: seq,
                series_hash: 0,
            },
        );
    }
}
