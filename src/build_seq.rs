// ============================================================================
// BUILD SEQUENCE GUARD
// ============================================================================
// Tracks the last successful build sequence and classifies each observation.
// A regression marks the guard violating; the engine keeps routing but stops
// trusting the cycle for cache and lifecycle mutations until the sequence
// advances again.
//
//   collector mode  requires strict advancement; a repeated sequence is Broken
//   runtime mode    a repeated sequence is a normal tick
// ============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMode {
    #[default]
    Collector,
    Runtime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSeqTransition {
    #[default]
    None,
    /// Sequence regressed; this cycle is not trusted
    Broken,
    /// Sequence advanced past the regression
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSeqObservation {
    pub transition: BuildSeqTransition,
    /// Last successful sequence before this observation (0 on the first)
    pub previous: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BuildSeqGuard {
    mode: PlannerMode,
    initialized: bool,
    violating: bool,
    last_success: u64,
}

impl BuildSeqGuard {
    pub fn new(mode: PlannerMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> PlannerMode {
        self.mode
    }

    pub fn is_violating(&self) -> bool {
        self.violating
    }

    pub fn last_success(&self) -> Option<u64> {
        self.initialized.then_some(self.last_success)
    }

    pub fn observe(&mut self, seq: u64) -> BuildSeqObservation {
        let previous = self.last_success;

        if !self.initialized {
            self.initialized = true;
            self.last_success = seq;
            return BuildSeqObservation {
                transition: BuildSeqTransition::None,
                previous,
            };
        }

        let advanced = match self.mode {
            PlannerMode::Collector => seq > self.last_success,
            PlannerMode::Runtime => seq >= self.last_success,
        };

        let transition = if advanced {
            let transition = if self.violating {
                BuildSeqTransition::Recovered
            } else {
                BuildSeqTransition::None
            };
            self.violating = false;
            self.last_success = self.last_success.max(seq);
            transition
        } else if self.violating {
            BuildSeqTransition::None
        } else {
            self.violating = true;
            BuildSeqTransition::Broken
        };

        BuildSeqObservation { transition, previous }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::BuildSeqTransition::{Broken, None as Stable, Recovered};

    fn run(mode: PlannerMode, seqs: &[u64]) -> (Vec<BuildSeqTransition>, Vec<u64>) {
        let mut guard = BuildSeqGuard::new(mode);
        seqs.iter()
            .map(|&seq| {
                let obs = guard.observe(seq);
                (obs.transition, obs.previous)
            })
            .unzip()
    }

    #[rstest]
    #[case::regression(&[10, 10, 9, 11, 12], &[Stable, Broken, Stable, Recovered, Stable], &[0, 10, 10, 10, 11])]
    #[case::repeated_duplicates(
        &[10, 10, 10, 9, 11, 12],
        &[Stable, Broken, Stable, Stable, Recovered, Stable],
        &[0, 10, 10, 10, 10, 11]
    )]
    #[case::monotonic(&[1, 2, 3], &[Stable, Stable, Stable], &[0, 1, 2])]
    fn test_collector_mode(#[case] seqs: &[u64], #[case] want: &[BuildSeqTransition], #[case] previous: &[u64]) {
        let (got, got_previous) = run(PlannerMode::Collector, seqs);
        assert_eq!(got, want);
        assert_eq!(got_previous, previous);
    }

    #[rstest]
    #[case::equal_is_stable(&[10, 10, 9, 10, 10], &[Stable, Stable, Broken, Recovered, Stable], &[0, 10, 10, 10, 10])]
    #[case::stays_broken(&[10, 8, 9, 11], &[Stable, Broken, Stable, Recovered], &[0, 10, 10, 10])]
    fn test_runtime_mode(#[case] seqs: &[u64], #[case] want: &[BuildSeqTransition], #[case] previous: &[u64]) {
        let (got, got_previous) = run(PlannerMode::Runtime, seqs);
        assert_eq!(got, want);
        assert_eq!(got_previous, previous);
    }

    #[test]
    fn test_violating_flag_tracks_state() {
        let mut guard = BuildSeqGuard::new(PlannerMode::Collector);
        assert_eq!(guard.last_success(), Option::None);

        guard.observe(5);
        assert!(!guard.is_violating());
        guard.observe(4);
        assert!(guard.is_violating());
        assert_eq!(guard.last_success(), Some(5));
        guard.observe(6);
        assert!(!guard.is_violating());
        assert_eq!(guard.last_success(), Some(6));
    }
}
