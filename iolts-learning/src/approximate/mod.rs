//! Approximate active learning of non-deterministic IOLTS with quiescence.
//!
//! The learner produces three automata that bracket the behavior of a black-box
//! process: the under-approximation H⁻ (every trace of H⁻ was observed on the
//! box), the over-approximation H⁺ (everything the box can do is in H⁺, with a
//! chaos sink absorbing unknown continuations) and the refined H★ (H⁺ with
//! provably unreachable chaos successors removed).
//!
//! [`run_approximated_lstar`] drives the loop: stabilize the observation table,
//! generate hypotheses, ask the model-checker oracle for counterexamples,
//! resolve them into the table and repeat until the oracle is satisfied.

mod cache;
mod cex;
pub mod display;
mod hypothesis;
pub mod mcrl2;
mod oracle;
mod sul;
mod table;

pub use cache::{Outcome, OutcomeLog};
pub use oracle::{OracleError, PrecisionOracle, Violation};
pub use sul::{
    all_seen_probability, probably_all_seen, Bucket, InteractionCounters, IoProcess, IoltsSul,
    SimulatedIolts,
};
pub use table::{Cell, ObservationTable};

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

use iolts::{IoltsMachine, Trace};

use cex::CexCaches;

/// Hard cap on the number of learning rounds before giving up.
pub const MAX_LEARNING_ROUNDS: usize = 400;
/// Hard cap on the number of stabilization rounds within one learning round.
pub const MAX_STABILIZING_ROUNDS: usize = 200;

/// Tunables of the approximate learner.
#[derive(Debug, Clone)]
pub struct LstarConfig {
    /// Confidence required before a trace whose continuation keeps mismatching is
    /// declared unreachable.
    pub query_threshold: f64,
    /// Confidence required before an observed outcome set is marked complete.
    pub completeness_threshold: f64,
    /// Run the quiescence-reducibility fixed point after stabilization.
    pub enforce_quiescence_reduced: bool,
    /// Spell out δ self-loops in the hypotheses instead of leaving them implicit.
    pub enforce_quiescence_self_loops: bool,
    /// Allow table resets on stalls instead of aborting.
    pub enable_reset: bool,
    /// Verbosity, 0 (quiet) to 3 (dump the observation table every round).
    pub print_level: u8,
}

impl Default for LstarConfig {
    fn default() -> Self {
        Self {
            query_threshold: 0.99,
            completeness_threshold: 0.99,
            enforce_quiescence_reduced: true,
            enforce_quiescence_self_loops: true,
            enable_reset: true,
            print_level: 2,
        }
    }
}

/// Errors the learner can surface. Resets absorb the recoverable stalls when
/// enabled; everything here is terminal for the current invocation.
#[derive(Debug, Error)]
pub enum LstarError {
    #[error("a threshold lies outside the open interval (0,1)")]
    InvalidThreshold,
    #[error("hit the cap of {limit} learning rounds")]
    LearningRoundLimit {
        limit: usize,
        s_set: Vec<Trace>,
        e_set: Vec<Trace>,
        counterexamples: Vec<Trace>,
    },
    #[error("hit the cap of {limit} stabilization rounds")]
    StabilizationLimit { limit: usize },
    #[error("observation table inconsistency cannot be resolved: {cause}")]
    UnresolvableInconsistency { cause: String },
    #[error("no counterexample improves the observation table")]
    CounterexampleStall { counterexamples: Vec<Trace> },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Metrics of one learner invocation.
#[derive(Debug, Clone)]
pub struct LearningInfo {
    pub learning_rounds: usize,
    pub resets: usize,
    pub h_minus_states: usize,
    pub h_plus_states: usize,
    pub h_star_states: usize,
    pub s_size: usize,
    pub e_size: usize,
    pub cache_size: usize,
    pub quiescence_reduced: bool,
    pub total_time: Duration,
    pub learning_time: Duration,
    pub checking_time: Duration,
    pub query_threshold: f64,
    pub completeness_threshold: f64,
    pub counters: InteractionCounters,
}

/// The result of a successful run: the three bracketing hypotheses plus metrics.
pub struct Learned {
    pub h_minus: IoltsMachine,
    pub h_plus: IoltsMachine,
    pub h_star: IoltsMachine,
    pub info: LearningInfo,
}

/// Runs the approximate L*-style learner against the black box wrapped in `sul`,
/// using `oracle` as the source of counterexamples.
pub fn run_approximated_lstar<P: IoProcess, O: PrecisionOracle>(
    sul: &mut IoltsSul<P>,
    oracle: &mut O,
    config: &LstarConfig,
) -> Result<Learned, LstarError> {
    let in_range = |v: f64| v > 0.0 && v < 1.0;
    if !in_range(config.query_threshold) || !in_range(config.completeness_threshold) {
        return Err(LstarError::InvalidThreshold);
    }
    sul.set_thresholds(config.query_threshold, config.completeness_threshold);

    // a property that already fails on the reference is a configuration error
    oracle.validate_properties()?;

    let start = Instant::now();
    let mut learning_time = Duration::ZERO;
    let mut rounds = 0usize;
    let mut resets = 0usize;
    let mut last_counterexamples: Vec<Trace> = Vec::new();

    let mut table = ObservationTable::new(sul.input_alphabet(), sul.output_alphabet());
    let mut caches = CexCaches::default();

    'learning: loop {
        rounds += 1;
        if rounds >= MAX_LEARNING_ROUNDS {
            return Err(LstarError::LearningRoundLimit {
                limit: MAX_LEARNING_ROUNDS,
                s_set: table.s_set().to_vec(),
                e_set: table.e_set().to_vec(),
                counterexamples: last_counterexamples,
            });
        }
        if config.print_level >= 1 {
            info!(round = rounds, "learning round");
        } else {
            debug!(round = rounds, "learning round");
        }
        let learning_started = Instant::now();

        // stabilize the table and drive the quiescence reduction to a fixed point
        let quiescence_reduced = loop {
            table.refresh(sul);

            let mut stabilizing = 0usize;
            loop {
                stabilizing += 1;
                if stabilizing >= MAX_STABILIZING_ROUNDS {
                    if config.enable_reset {
                        warn!("stabilization cap hit, resetting the table");
                        resets += 1;
                        table.clear();
                        caches.clear();
                        continue 'learning;
                    }
                    return Err(LstarError::StabilizationLimit {
                        limit: MAX_STABILIZING_ROUNDS,
                    });
                }

                if let Some(row) = table.is_globally_closed() {
                    let added = table.extend_s([row]);
                    if config.print_level > 1 {
                        debug!(added = %added.iter().join(", "), "closing extended S");
                    }
                    table.refresh(sul);
                    continue;
                }

                if let Some((suffix, cause)) = table.is_globally_consistent() {
                    let added = table.extend_e([suffix]);
                    if added.is_empty() {
                        if config.enable_reset {
                            info!("inconsistency cannot be resolved, resetting the table");
                            resets += 1;
                            table.clear();
                            caches.clear();
                            table.refresh(sul);
                            continue;
                        }
                        return Err(LstarError::UnresolvableInconsistency { cause });
                    }
                    if config.print_level > 1 {
                        debug!(added = %added.iter().join(", "), "consistency extended E");
                    }
                    table.refresh(sul);
                    continue;
                }

                debug!(stabilizing, "table is closed and consistent");
                break;
            }

            match table.is_quiescence_reducible() {
                None => break true,
                Some((witness, cause)) => {
                    if !config.enforce_quiescence_reduced {
                        break false;
                    }
                    let added = table.extend_e(witness.suffixes().collect_vec());
                    if added.is_empty() {
                        warn!(cause = %cause, "quiescence reduction made no progress");
                        break false;
                    }
                    if config.print_level > 1 {
                        debug!(added = %added.iter().join(", "), "quiescence reduction extended E");
                    }
                }
            }
        };
        learning_time += learning_started.elapsed();

        let h_minus = table.gen_hypothesis_minus();
        let h_plus = table.gen_hypothesis_plus(true, config.enforce_quiescence_self_loops);
        let unreachable = sul.unreachable_traces().cloned().collect_vec();
        let mut h_star =
            table.gen_hypothesis_star(unreachable.iter(), config.enforce_quiescence_self_loops);

        if config.print_level >= 3 {
            info!("\n{}", display::render_observation_table(&table));
        }

        // liveness is checked on H- and H*, safety on H*; a failing H* check is
        // downgraded to a safety check of H+
        let mut violations = oracle.find_liveness_cex(&h_minus)?;
        let star_violations = oracle.find_liveness_cex(&h_star).and_then(|mut vs| {
            oracle.find_safety_cex(&h_star).map(|more| {
                vs.extend(more);
                vs
            })
        });
        match star_violations {
            Ok(vs) => violations.extend(vs),
            Err(err) => {
                warn!(%err, "H* check failed, falling back to safety on H+");
                violations.extend(oracle.find_safety_cex(&h_plus)?);
            }
        }

        let counterexamples = violations
            .iter()
            .map(|v| v.trace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect_vec();

        if counterexamples.is_empty() {
            if !config.enforce_quiescence_self_loops {
                // prefer the variant with explicit δ loops if it stays safe
                let candidate = table.gen_hypothesis_star(unreachable.iter(), true);
                match oracle.find_safety_cex(&candidate) {
                    Ok(vs) if vs.is_empty() => h_star = candidate,
                    Ok(vs) => debug!(
                        violations = vs.len(),
                        "explicit δ loops violate safety, keeping the reduced H*"
                    ),
                    Err(err) => warn!(%err, "could not check the δ self-loop variant of H*"),
                }
            }

            let total_time = start.elapsed();
            let info = LearningInfo {
                learning_rounds: rounds,
                resets,
                h_minus_states: h_minus.size(),
                h_plus_states: h_plus.size(),
                h_star_states: h_star.size(),
                s_size: table.s_set().len(),
                e_size: table.e_set().len(),
                cache_size: sul.cache_size(),
                quiescence_reduced,
                total_time,
                learning_time,
                checking_time: total_time.saturating_sub(learning_time),
                query_threshold: config.query_threshold,
                completeness_threshold: config.completeness_threshold,
                counters: sul.counters(),
            };
            if config.print_level >= 1 {
                info!("\n{info}");
            }
            return Ok(Learned {
                h_minus,
                h_plus,
                h_star,
                info,
            });
        }

        if config.print_level > 1 {
            for violation in &violations {
                debug!(trace = %violation.trace, property = %violation.property, "counterexample");
            }
        }
        last_counterexamples = counterexamples.clone();

        if !cex::resolve(&counterexamples, &mut table, &mut caches) {
            if config.enable_reset {
                info!("no counterexample improves the observation table, resetting");
                resets += 1;
                table.clear();
                caches.clear();
                continue;
            }
            return Err(LstarError::CounterexampleStall { counterexamples });
        }
    }
}
