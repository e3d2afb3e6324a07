use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, trace};

use iolts::{IoltsMachine, Letter, StateId, Trace};

use super::cache::{Outcome, OutcomeLog, TraceCache};

/// The contract the learner expects from the black-box process. The process is
/// non-deterministic: replaying the same trace after a reset may yield different
/// outputs, the learner only relies on the set of possible outcomes being finite
/// and every possible outcome eventually showing up under repeated sampling.
pub trait IoProcess {
    /// Brings the process back to its initial state.
    fn reset(&mut self);
    /// Fires an input and records whether the process accepted it.
    fn step(&mut self, input: &Letter);
    /// Whether the last input fired with [`IoProcess::step`] was accepted.
    fn is_healthy(&self) -> bool;
    /// Blocks until the next spontaneous output, or returns [`Letter::Quiescence`]
    /// when none occurs before the implementation-defined timeout.
    fn listen(&mut self) -> Letter;
    fn input_alphabet(&self) -> &[Letter];
    fn output_alphabet(&self) -> &[Letter];
}

/// Runs an [`IoltsMachine`] as a black box, resolving non-determinism with a
/// seeded RNG. This is the in-process stand-in for a real system under learning;
/// it is also what the benchmark models are driven through.
#[derive(Debug, Clone)]
pub struct SimulatedIolts {
    machine: IoltsMachine,
    inputs: Vec<Letter>,
    outputs: Vec<Letter>,
    current: StateId,
    healthy: bool,
    rng: StdRng,
}

impl SimulatedIolts {
    pub fn new(machine: IoltsMachine) -> Self {
        Self::with_seed(machine, 0)
    }

    pub fn with_seed(machine: IoltsMachine, seed: u64) -> Self {
        let inputs = machine.input_alphabet();
        let outputs = machine.output_alphabet();
        let current = machine.initial();
        Self {
            machine,
            inputs,
            outputs,
            current,
            healthy: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn machine(&self) -> &IoltsMachine {
        &self.machine
    }

    fn choose(&mut self, candidates: &BTreeSet<StateId>) -> Option<StateId> {
        let flat = candidates.iter().copied().collect_vec();
        flat.choose(&mut self.rng).copied()
    }
}

impl IoProcess for SimulatedIolts {
    fn reset(&mut self) {
        self.current = self.machine.initial();
        self.healthy = true;
    }

    fn step(&mut self, input: &Letter) {
        let successors = self.machine.successors(self.current, input);
        match self.choose(&successors) {
            Some(next) => {
                self.current = next;
                self.healthy = true;
            }
            None => self.healthy = false,
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn listen(&mut self) -> Letter {
        let state = self
            .machine
            .state(self.current)
            .expect("simulation points at a removed state");
        let edges = state
            .output_edges()
            .map(|(letter, target)| (letter.clone(), target))
            .collect_vec();
        if let Some((letter, target)) = edges.choose(&mut self.rng) {
            self.current = *target;
            return letter.clone();
        }
        // quiescent: follow an explicit δ edge if one exists, otherwise stay put
        let targets = state.quiescence_targets().clone();
        if let Some(next) = self.choose(&targets) {
            self.current = next;
        }
        Letter::Quiescence
    }

    fn input_alphabet(&self) -> &[Letter] {
        &self.inputs
    }

    fn output_alphabet(&self) -> &[Letter] {
        &self.outputs
    }
}

/// The probability that every possible outcome at a trace has been observed,
/// given `n` samples covering `k` distinct outcomes. Assumes a novel outcome, if
/// any exists, has probability at least `1/(k+1)` per sample.
pub fn all_seen_probability(n: u64, k: usize) -> f64 {
    1.0 - (1.0 - 1.0 / (k as f64 + 1.0)).powf(n as f64)
}

/// The monotone give-up/stop predicate built on [`all_seen_probability`].
pub fn probably_all_seen(n: u64, k: usize, threshold: f64) -> bool {
    all_seen_probability(n, k) >= threshold
}

/// Per-bucket interaction counts of the sampling oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    pub queries: u64,
    pub cached_queries: u64,
    pub steps: u64,
    pub listens: u64,
}

/// Interaction counts, split so that the cost of learning proper and the cost of
/// completeness estimation can be reported separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionCounters {
    pub learning: Bucket,
    pub completeness: Bucket,
}

enum Run {
    /// The whole trace was traversed; the letter is the result of the final listen.
    Completed(Letter),
    /// The listen at position `at` produced a different letter than the trace asks for.
    Mismatch { at: usize },
    /// The input at position `at` was rejected.
    Rejected { at: usize },
}

/// The probabilistic sampling oracle wrapped around a black-box process.
///
/// On top of raw step/listen it offers trace queries with retry-until-confident
/// semantics and completeness queries, and it memoizes every observed outcome in
/// a trace → outcome multiset cache. The cache is the expensive part of learning
/// and survives observation-table resets.
pub struct IoltsSul<P: IoProcess> {
    process: P,
    query_threshold: f64,
    completeness_threshold: f64,
    cache: TraceCache,
    counters: InteractionCounters,
    completeness_mode: bool,
    rng: StdRng,
}

impl<P: IoProcess> IoltsSul<P> {
    /// Wraps `process`. Both thresholds are confidences in the open interval (0,1).
    pub fn new(process: P, query_threshold: f64, completeness_threshold: f64) -> Self {
        Self::with_seed(process, query_threshold, completeness_threshold, 0)
    }

    pub fn with_seed(
        process: P,
        query_threshold: f64,
        completeness_threshold: f64,
        seed: u64,
    ) -> Self {
        assert!(
            (0.0..1.0).contains(&query_threshold) && query_threshold > 0.0,
            "query threshold must lie in (0,1)"
        );
        assert!(
            (0.0..1.0).contains(&completeness_threshold) && completeness_threshold > 0.0,
            "completeness threshold must lie in (0,1)"
        );
        Self {
            process,
            query_threshold,
            completeness_threshold,
            cache: TraceCache::default(),
            counters: InteractionCounters::default(),
            completeness_mode: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn query_threshold(&self) -> f64 {
        self.query_threshold
    }

    /// Re-tunes both confidences; the cache and counters are unaffected.
    pub fn set_thresholds(&mut self, query_threshold: f64, completeness_threshold: f64) {
        self.query_threshold = query_threshold;
        self.completeness_threshold = completeness_threshold;
    }

    pub fn completeness_threshold(&self) -> f64 {
        self.completeness_threshold
    }

    pub fn input_alphabet(&self) -> Vec<Letter> {
        self.process.input_alphabet().to_vec()
    }

    pub fn output_alphabet(&self) -> Vec<Letter> {
        self.process.output_alphabet().to_vec()
    }

    pub fn counters(&self) -> InteractionCounters {
        self.counters
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// The distinct letters ever observed after `word`.
    pub fn observed_at(&self, word: &Trace) -> impl Iterator<Item = &Letter> + '_ {
        self.cache
            .get(word)
            .into_iter()
            .flat_map(|log| log.observed())
    }

    /// Whether `word` or one of its prefixes carries a permanent ⊥ mark.
    pub fn is_unreachable(&self, word: &Trace) -> bool {
        (1..=word.len()).any(|n| {
            self.cache
                .get(&word.prefix(n))
                .is_some_and(OutcomeLog::is_unreachable)
        })
    }

    /// All traces marked unreachable, in cache insertion order.
    pub fn unreachable_traces(&self) -> impl Iterator<Item = &Trace> + '_ {
        self.cache
            .iter()
            .filter(|(_, log)| log.is_unreachable())
            .map(|(trace, _)| trace)
    }

    /// Executes `word` on the black box and returns the letter observed after it,
    /// or `None` when the trace is (believed to be) unreachable.
    ///
    /// With `use_cache` the answer is a uniformly random element of the cached
    /// outcome multiset when one exists. Without it (and for uncached traces) the
    /// trace is replayed, retrying mismatching runs until either the trace is
    /// traversed or the all-seen estimate at the divergence point clears the query
    /// threshold, at which point the trace is marked ⊥.
    pub fn query(&mut self, word: &Trace, use_cache: bool) -> Option<Letter> {
        if use_cache {
            if let Some(log) = self.cache.get(word) {
                if log.has_observations() {
                    let outcome = log.sample(&mut self.rng).cloned();
                    self.bucket().cached_queries += 1;
                    return match outcome {
                        Some(Outcome::Observed(letter)) => Some(letter),
                        _ => None,
                    };
                }
            }
        }
        if self.is_unreachable(word) {
            return None;
        }

        self.bucket().queries += 1;
        let mut rejections: HashMap<usize, u64> = HashMap::new();
        loop {
            match self.run_once(word) {
                Run::Completed(output) => {
                    trace!(%word, %output, "trace traversed");
                    return Some(output);
                }
                Run::Mismatch { at } => {
                    let prefix = word.prefix(at);
                    let expected = &word[at];
                    let log = self.cache.get(&prefix);
                    if log.is_some_and(|l| l.contains_observed(expected)) {
                        // the expected letter is known to be possible here, retry
                        continue;
                    }
                    let (n, k) = log.map_or((0, 0), |l| (l.observed_total(), l.distinct_observed()));
                    if probably_all_seen(n, k, self.query_threshold) {
                        self.mark_unreachable(word, at);
                        return None;
                    }
                }
                Run::Rejected { at } => {
                    let seen = rejections.entry(at).or_insert(0);
                    *seen += 1;
                    if probably_all_seen(*seen, 1, self.query_threshold) {
                        self.mark_unreachable(word, at);
                        return None;
                    }
                }
            }
        }
    }

    /// Decides whether `seen` plausibly covers every outcome possible after `word`.
    /// Returns `false` as soon as a novel outcome shows up; returns `true` once the
    /// all-seen estimate over the trace's outcome log clears the completeness
    /// threshold. The interactions are booked to the completeness bucket.
    pub fn completeness_query(&mut self, word: &Trace, seen: &BTreeSet<Letter>) -> bool {
        self.completeness_mode = true;
        let complete = self.completeness_query_inner(word, seen);
        self.completeness_mode = false;
        complete
    }

    fn completeness_query_inner(&mut self, word: &Trace, seen: &BTreeSet<Letter>) -> bool {
        loop {
            if let Some(log) = self.cache.get(word) {
                // cached evidence counts: anything outside `seen` refutes right away
                if log.observed().any(|letter| !seen.contains(letter)) {
                    return false;
                }
                if probably_all_seen(
                    log.observed_total(),
                    log.distinct_observed(),
                    self.completeness_threshold,
                ) {
                    return true;
                }
            }
            match self.query(word, false) {
                None => return false,
                Some(letter) => {
                    if !seen.contains(&letter) {
                        debug!(%word, %letter, "novel outcome during completeness estimation");
                        return false;
                    }
                }
            }
        }
    }

    fn bucket(&mut self) -> &mut Bucket {
        if self.completeness_mode {
            &mut self.counters.completeness
        } else {
            &mut self.counters.learning
        }
    }

    fn run_once(&mut self, word: &Trace) -> Run {
        self.process.reset();
        for (at, letter) in word.iter().enumerate() {
            match letter {
                Letter::Input(_) => {
                    self.process.step(letter);
                    self.bucket().steps += 1;
                    if !self.process.is_healthy() {
                        return Run::Rejected { at };
                    }
                }
                Letter::Output(_) | Letter::Quiescence => {
                    let observed = self.listen_after(&word.prefix(at));
                    if &observed != letter {
                        return Run::Mismatch { at };
                    }
                }
            }
        }
        Run::Completed(self.listen_after(word))
    }

    /// Listens once and books the observation to the outcome log of `prefix`.
    fn listen_after(&mut self, prefix: &Trace) -> Letter {
        let observed = self.process.listen();
        self.bucket().listens += 1;
        self.cache
            .entry(prefix.clone())
            .or_default()
            .record(Outcome::Observed(observed.clone()));
        observed
    }

    /// Marks `word` and the shortest failing prefix `word[..=at]` as unreachable.
    /// Logs that already carry observations are left untouched; ⊥ only ever lands
    /// on traces that were never traversed.
    fn mark_unreachable(&mut self, word: &Trace, at: usize) {
        debug!(%word, at, "declaring trace unreachable");
        let mut marks = vec![word.prefix(at + 1)];
        if at + 1 < word.len() {
            marks.push(word.clone());
        }
        for marked in marks {
            let log = self.cache.entry(marked).or_default();
            if !log.has_observations() {
                log.record(Outcome::Unreachable);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iolts::IoltsBuilder;

    fn coin() -> SimulatedIolts {
        SimulatedIolts::with_seed(
            IoltsBuilder::default()
                .with_transitions([
                    (0, Letter::input("flip"), 1),
                    (1, Letter::output("heads"), 0),
                    (1, Letter::output("tails"), 0),
                ])
                .into_machine(0),
            13,
        )
    }

    fn dead_end() -> SimulatedIolts {
        SimulatedIolts::with_seed(
            IoltsBuilder::default()
                .with_transitions([(0, Letter::input("a"), 1)])
                .into_machine(0),
            13,
        )
    }

    #[test]
    fn all_seen_probability_is_monotone_in_n() {
        assert_eq!(all_seen_probability(0, 0), 0.0);
        assert!(all_seen_probability(1, 1) < all_seen_probability(2, 1));
        assert!(probably_all_seen(10, 1, 0.99));
        assert!(!probably_all_seen(3, 2, 0.99));
    }

    #[test]
    fn query_returns_an_observed_output() {
        let mut sul = IoltsSul::with_seed(coin(), 0.95, 0.95, 7);
        let word = Trace::letter(Letter::input("flip"));
        let out = sul.query(&word, false).unwrap();
        assert!(out == Letter::output("heads") || out == Letter::output("tails"));
        assert!(sul.observed_at(&word).any(|l| *l == out));
        assert_eq!(sul.counters().learning.queries, 1);
        assert_eq!(sul.counters().completeness, Bucket::default());
    }

    #[test]
    fn quiescent_initial_state_answers_delta() {
        let mut sul = IoltsSul::with_seed(coin(), 0.95, 0.95, 7);
        assert_eq!(sul.query(&Trace::epsilon(), false), Some(Letter::Quiescence));
    }

    #[test]
    fn rejected_input_marks_the_trace_unreachable() {
        let mut sul = IoltsSul::with_seed(dead_end(), 0.99, 0.99, 7);
        let word = Trace::from([Letter::input("a"), Letter::input("a")]);
        assert_eq!(sul.query(&word, false), None);
        assert!(sul.is_unreachable(&word));
        // the mark is permanent and extends to every continuation
        let longer = word.extended(Letter::input("a"));
        assert_eq!(sul.query(&longer, false), None);
        assert!(sul.unreachable_traces().next().is_some());
    }

    #[test]
    fn mismatching_output_marks_the_trace_unreachable() {
        let mut sul = IoltsSul::with_seed(coin(), 0.99, 0.99, 7);
        let word = Trace::from([Letter::input("flip"), Letter::output("fire")]);
        assert_eq!(sul.query(&word, false), None);
        assert!(sul.is_unreachable(&word));
        // the retries leave their observations behind
        let prefix = Trace::letter(Letter::input("flip"));
        assert!(sul.observed_at(&prefix).count() >= 1);
    }

    #[test]
    fn cached_query_picks_from_the_multiset() {
        let mut sul = IoltsSul::with_seed(coin(), 0.95, 0.95, 7);
        let word = Trace::letter(Letter::input("flip"));
        for _ in 0..20 {
            sul.query(&word, false);
        }
        let mut seen = BTreeSet::new();
        for _ in 0..40 {
            seen.insert(sul.query(&word, true).unwrap());
        }
        assert_eq!(seen.len(), 2);
        assert!(sul.counters().learning.cached_queries >= 40);
    }

    #[test]
    fn completeness_query_accepts_the_full_output_set() {
        let mut sul = IoltsSul::with_seed(coin(), 0.99, 0.99, 7);
        let word = Trace::letter(Letter::input("flip"));
        let seen = BTreeSet::from([Letter::output("heads"), Letter::output("tails")]);
        assert!(sul.completeness_query(&word, &seen));
        assert!(sul.counters().completeness.queries > 0);
        assert_eq!(sul.counters().learning.steps, 0);
    }

    #[test]
    fn completeness_query_rejects_on_a_novel_outcome() {
        let mut sul = IoltsSul::with_seed(coin(), 0.99, 0.99, 7);
        let word = Trace::letter(Letter::input("flip"));
        // with nothing accepted, the very first outcome already refutes
        assert!(!sul.completeness_query(&word, &BTreeSet::new()));

        // cached evidence outside the accepted set refutes without sampling
        for _ in 0..20 {
            sul.query(&word, false);
        }
        let observed: BTreeSet<Letter> = sul.observed_at(&word).cloned().collect();
        for letter in &observed {
            let all_but_one: BTreeSet<Letter> =
                observed.iter().filter(|l| *l != letter).cloned().collect();
            assert!(!sul.completeness_query(&word, &all_but_one));
        }
    }

    #[test]
    fn completed_cells_answer_without_new_samples() {
        let mut sul = IoltsSul::with_seed(coin(), 0.99, 0.99, 7);
        let word = Trace::letter(Letter::input("flip"));
        let seen = BTreeSet::from([Letter::output("heads"), Letter::output("tails")]);
        assert!(sul.completeness_query(&word, &seen));
        let queries_before = sul.counters().completeness.queries;
        assert!(sul.completeness_query(&word, &seen));
        assert_eq!(sul.counters().completeness.queries, queries_before);
    }
}
