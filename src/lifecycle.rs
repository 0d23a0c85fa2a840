// ============================================================================
// LIFECYCLE ENFORCEMENT
// ============================================================================
// Two independent passes over the materialized state, run once per trusted
// build:
//
//   caps    per-chart dimension limit, evicting least recently seen first
//   expiry  charts and dimensions unseen for too many build cycles
//
// Both passes mutate only the materialized state and return removal lists
// for the job runtime. Dimensions claimed in the current build are never
// evicted.
// ============================================================================

use compact_str::CompactString;
use serde::Serialize;
use tracing::debug;

use crate::state::{BuildScratch, MaterializedState};

// ----------------------------------------------------------------------------
// Removal Instructions
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DimensionRemoval {
    pub chart_id: CompactString,
    pub name: CompactString,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ChartRemoval {
    pub chart_id: CompactString,
}

/// Removal instructions produced by one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Removals {
    pub dimensions: Vec<DimensionRemoval>,
    pub charts: Vec<ChartRemoval>,
}

impl Removals {
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.charts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len() + self.charts.len()
    }

    pub fn extend(&mut self, other: Removals) {
        self.dimensions.extend(other.dimensions);
        self.charts.extend(other.charts);
    }
}

// ----------------------------------------------------------------------------
// Cap Eviction
// ----------------------------------------------------------------------------

/// Evict least recently seen dimensions from charts over their `max_dims`.
///
/// The count includes dimensions new in this build. Candidates are durable
/// dimensions not claimed in `scratch` and not seen in `current_seq`; ties
/// break by name. When too few candidates exist the chart stays over its cap.
pub fn enforce_lifecycle_caps(
    current_seq: u64,
    scratch: &BuildScratch,
    state: &mut MaterializedState,
) -> Vec<DimensionRemoval> {
    let mut removals = Vec::new();

    for (chart_id, chart) in state.charts_mut() {
        let max_dims = chart.lifecycle.dimensions.max_dims;
        if max_dims == 0 {
            continue;
        }

        let build = scratch.chart(chart_id);
        let new_dims = build.map_or(0, |b| {
            b.entries
                .keys()
                .filter(|name| !chart.dimensions.contains_key(name.as_str()))
                .count()
        });
        let count = chart.dimensions.len() + new_dims;
        if count <= max_dims {
            continue;
        }

        let mut candidates: Vec<(u64, CompactString)> = chart
            .dimensions
            .iter()
            .filter(|(name, dim)| {
                dim.last_seen_success_seq != current_seq && !build.is_some_and(|b| b.contains(name))
            })
            .map(|(name, dim)| (dim.last_seen_success_seq, name.clone()))
            .collect();
        candidates.sort_unstable();

        let excess = count - max_dims;
        if candidates.len() < excess {
            debug!(
                target: "chartengine::lifecycle",
                chart = %chart_id,
                max_dims,
                count,
                evictable = candidates.len(),
                "Chart stays over its dimension cap"
            );
        }

        for (_, name) in candidates.into_iter().take(excess) {
            chart.dimensions.remove(&name);
            removals.push(DimensionRemoval {
                chart_id: chart_id.clone(),
                name,
            });
        }
    }

    removals.sort_unstable();
    removals
}

// ----------------------------------------------------------------------------
// Expiry
// ----------------------------------------------------------------------------

/// Remove charts and dimensions unseen for more than their expiry.
///
/// An expired chart is removed whole and reported once as a chart removal.
/// Dimensions of surviving charts expire on their own policy.
pub fn collect_expiry_removals(current_seq: u64, state: &mut MaterializedState) -> Removals {
    let mut removals = Removals::default();

    for (chart_id, chart) in state.charts_mut() {
        let expire = chart.lifecycle.expire_after_cycles;
        if expire > 0 && current_seq.saturating_sub(chart.last_seen_success_seq) > expire {
            removals.charts.push(ChartRemoval {
                chart_id: chart_id.clone(),
            });
            continue;
        }

        let dim_expire = chart.lifecycle.dimensions.expire_after_cycles;
        if dim_expire == 0 {
            continue;
        }
        for (name, dim) in &chart.dimensions {
            if current_seq.saturating_sub(dim.last_seen_success_seq) > dim_expire {
                removals.dimensions.push(DimensionRemoval {
                    chart_id: chart_id.clone(),
                    name: name.clone(),
                });
            }
        }
    }

    for removal in &removals.charts {
        state.remove_chart(&removal.chart_id);
    }
    for removal in &removals.dimensions {
        state.remove_dimension(&removal.chart_id, &removal.name);
    }

    removals.charts.sort_unstable();
    removals.dimensions.sort_unstable();
    removals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::route::{RouteBinding, RouteOrigin};
    use crate::template::{Algorithm, ChartMeta, DimensionLifecyclePolicy, LifecyclePolicy};
    use pretty_assertions::assert_eq;

    fn binding(chart_id: &str, dimension: &str, lifecycle: LifecyclePolicy) -> RouteBinding {
        RouteBinding {
            chart_id: chart_id.into(),
            template_id: None,
            origin: RouteOrigin::Template,
            dimension_name: dimension.into(),
            dimension_key_label: None,
            algorithm: Algorithm::Absolute,
            multiplier: 1,
            divisor: 1,
            hidden: false,
            static_dimension: false,
            chart: Arc::new(ChartMeta::default()),
            lifecycle,
        }
    }

    fn seed(state: &mut MaterializedState, chart_id: &str, chart_seen: u64, dims: &[(&str, u64)], lifecycle: LifecyclePolicy) {
        for (name, seen) in dims {
            let b = binding(chart_id, name, lifecycle);
            let (chart, _) = state.ensure_chart(&b);
            chart.touch(chart_seen);
            let (dim, _) = chart.ensure_dimension(&b);
            dim.touch(*seen);
        }
    }

    fn capped(max_dims: usize) -> LifecyclePolicy {
        LifecyclePolicy {
            dimensions: DimensionLifecyclePolicy {
                max_dims,
                expire_after_cycles: 0,
            },
            expire_after_cycles: 0,
        }
    }

    fn removal(chart_id: &str, name: &str) -> DimensionRemoval {
        DimensionRemoval {
            chart_id: chart_id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn test_cap_evicts_oldest_and_keeps_current_build() {
        let mut state = MaterializedState::new();
        seed(&mut state, "chart", 2, &[("old_a", 1), ("old_b", 2)], capped(2));

        let mut scratch = BuildScratch::new();
        scratch.begin(10);
        scratch.stage("chart", "new_c");

        let removed = enforce_lifecycle_caps(10, &scratch, &mut state);
        assert_eq!(removed, vec![removal("chart", "old_a")]);

        let chart = state.chart("chart").unwrap();
        assert!(chart.dimension("old_a").is_none());
        assert!(chart.dimension("old_b").is_some());
    }

    #[test]
    fn test_cap_ignores_dimensions_claimed_this_build() {
        let mut state = MaterializedState::new();
        seed(&mut state, "chart", 5, &[("a", 1), ("b", 2), ("c", 3)], capped(1));

        let mut scratch = BuildScratch::new();
        scratch.begin(10);
        scratch.stage("chart", "a");

        let removed = enforce_lifecycle_caps(10, &scratch, &mut state);
        assert_eq!(removed, vec![removal("chart", "b"), removal("chart", "c")]);
        assert!(state.contains_dimension("chart", "a"));
    }

    #[test]
    fn test_cap_never_evicts_dimension_seen_at_current_seq() {
        let mut state = MaterializedState::new();
        seed(&mut state, "chart", 10, &[("a", 10), ("b", 10), ("c", 9)], capped(1));

        let mut scratch = BuildScratch::new();
        scratch.begin(10);

        let removed = enforce_lifecycle_caps(10, &scratch, &mut state);
        assert_eq!(removed, vec![removal("chart", "c")]);
        assert_eq!(state.chart("chart").unwrap().dimension_count(), 2);
    }

    #[test]
    fn test_cap_breaks_ties_by_name() {
        let mut state = MaterializedState::new();
        seed(&mut state, "chart", 3, &[("b", 3), ("a", 3), ("c", 3)], capped(2));

        let mut scratch = BuildScratch::new();
        scratch.begin(4);

        let removed = enforce_lifecycle_caps(4, &scratch, &mut state);
        assert_eq!(removed, vec![removal("chart", "a")]);
    }

    #[test]
    fn test_uncapped_and_under_cap_charts_untouched() {
        let mut state = MaterializedState::new();
        seed(&mut state, "free", 1, &[("a", 1), ("b", 1), ("c", 1)], LifecyclePolicy::default());
        seed(&mut state, "roomy", 1, &[("a", 1)], capped(3));

        let mut scratch = BuildScratch::new();
        scratch.begin(2);
        scratch.stage("roomy", "b");

        assert!(enforce_lifecycle_caps(2, &scratch, &mut state).is_empty());
        assert_eq!(state.dimension_count(), 4);
    }

    #[test]
    fn test_expiry_removes_charts_and_dimensions_independently() {
        let mut state = MaterializedState::new();

        let chart_expiry = LifecyclePolicy {
            expire_after_cycles: 2,
            ..LifecyclePolicy::default()
        };
        seed(&mut state, "stale_chart", 2, &[("fresh_dim", 2)], chart_expiry);

        let dim_expiry = LifecyclePolicy {
            dimensions: DimensionLifecyclePolicy {
                max_dims: 0,
                expire_after_cycles: 2,
            },
            expire_after_cycles: 0,
        };
        seed(&mut state, "fresh_chart", 5, &[("stale_dim", 2), ("fresh_dim", 4)], dim_expiry);

        let removals = collect_expiry_removals(5, &mut state);
        assert_eq!(
            removals,
            Removals {
                dimensions: vec![removal("fresh_chart", "stale_dim")],
                charts: vec![ChartRemoval {
                    chart_id: "stale_chart".into()
                }],
            }
        );

        assert!(!state.contains_chart("stale_chart"));
        assert!(state.contains_dimension("fresh_chart", "fresh_dim"));
        assert!(!state.contains_dimension("fresh_chart", "stale_dim"));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let mut state = MaterializedState::new();
        let policy = LifecyclePolicy {
            expire_after_cycles: 2,
            ..LifecyclePolicy::default()
        };
        seed(&mut state, "c", 3, &[("d", 3)], policy);

        assert!(collect_expiry_removals(5, &mut state).is_empty());
        assert_eq!(collect_expiry_removals(6, &mut state).charts.len(), 1);
    }

    #[test]
    fn test_expiry_tolerates_sequence_regression() {
        let mut state = MaterializedState::new();
        let policy = LifecyclePolicy {
            expire_after_cycles: 1,
            ..LifecyclePolicy::default()
        };
        seed(&mut state, "c", 10, &[("d", 10)], policy);

        assert!(collect_expiry_removals(3, &mut state).is_empty());
    }
}
