use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use iolts::Letter;

/// One sampled outcome of running a trace: either the letter observed by the
/// final `listen`, or ⊥ for a trace that was declared unreachable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    Observed(Letter),
    Unreachable,
}

/// The multiset of outcomes observed after a single trace.
///
/// Outcomes are kept twice: as compact per-outcome counters for the statistics,
/// and as a flat sample vector so that a uniformly random element of the multiset
/// is an O(1) pick. A log grows monotonically and is never trimmed; a log that
/// contains only ⊥ marks its trace as permanently unreachable.
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    counts: IndexMap<Outcome, u32>,
    samples: Vec<Outcome>,
}

impl OutcomeLog {
    pub fn record(&mut self, outcome: Outcome) {
        *self.counts.entry(outcome.clone()).or_insert(0) += 1;
        self.samples.push(outcome);
    }

    /// Number of recorded observations, ⊥ marks excluded.
    pub fn observed_total(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(outcome, _)| **outcome != Outcome::Unreachable)
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    /// Number of distinct observed letters.
    pub fn distinct_observed(&self) -> usize {
        self.observed().count()
    }

    /// The distinct observed letters, in first-observation order.
    pub fn observed(&self) -> impl Iterator<Item = &Letter> + '_ {
        self.counts.keys().filter_map(|outcome| match outcome {
            Outcome::Observed(letter) => Some(letter),
            Outcome::Unreachable => None,
        })
    }

    pub fn has_observations(&self) -> bool {
        self.counts
            .keys()
            .any(|outcome| *outcome != Outcome::Unreachable)
    }

    pub fn contains_observed(&self, letter: &Letter) -> bool {
        self.counts
            .contains_key(&Outcome::Observed(letter.clone()))
    }

    /// A trace is unreachable once its log consists solely of ⊥ marks.
    pub fn is_unreachable(&self) -> bool {
        !self.samples.is_empty() && !self.has_observations()
    }

    /// A uniformly random element of the multiset.
    pub fn sample(&self, rng: &mut StdRng) -> Option<&Outcome> {
        self.samples.choose(rng)
    }
}

/// The trace → outcome multiset cache of the sampling oracle.
pub type TraceCache = IndexMap<iolts::Trace, OutcomeLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn log_counts_and_classifies() {
        let mut log = OutcomeLog::default();
        assert!(!log.is_unreachable());
        log.record(Outcome::Observed(Letter::output("x")));
        log.record(Outcome::Observed(Letter::output("x")));
        log.record(Outcome::Observed(Letter::Quiescence));
        assert_eq!(log.observed_total(), 3);
        assert_eq!(log.distinct_observed(), 2);
        assert!(log.contains_observed(&Letter::output("x")));
        assert!(!log.contains_observed(&Letter::output("y")));
        assert!(!log.is_unreachable());
    }

    #[test]
    fn only_bottom_means_unreachable() {
        let mut log = OutcomeLog::default();
        log.record(Outcome::Unreachable);
        assert!(log.is_unreachable());
        assert_eq!(log.observed_total(), 0);

        log.record(Outcome::Observed(Letter::output("x")));
        assert!(!log.is_unreachable(), "an observation overrides the mark");
    }

    #[test]
    fn sampling_is_uniform_over_the_multiset() {
        let mut log = OutcomeLog::default();
        log.record(Outcome::Observed(Letter::output("x")));
        log.record(Outcome::Observed(Letter::output("y")));
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..64 {
            seen.insert(log.sample(&mut rng).unwrap().clone());
        }
        assert_eq!(seen.len(), 2, "both elements show up under enough picks");
    }
}
