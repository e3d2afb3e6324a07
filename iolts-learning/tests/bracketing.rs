//! End-to-end bracketing checks against the benchmark models: whatever the
//! learner emits as H⁻ must never invent an output the model cannot produce,
//! and every behavior of the model must be absorbed by H⁺.

use std::collections::BTreeSet;
use std::path::PathBuf;

use iolts::{dot, IoltsMachine, Letter, StateId, Trace};
use iolts_learning::{run_approximated_lstar, IoltsSul, Learned, LstarConfig, SimulatedIolts};

const WALK_DEPTH: usize = 5;

fn model(name: &str) -> IoltsMachine {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../models")
        .join(name);
    dot::load(&path).expect("benchmark model parses")
}

fn learn(machine: IoltsMachine, seed: u64) -> Learned {
    let config = LstarConfig {
        query_threshold: 0.9999,
        completeness_threshold: 0.9999,
        print_level: 0,
        ..LstarConfig::default()
    };
    let mut sul = IoltsSul::with_seed(
        SimulatedIolts::with_seed(machine, seed),
        config.query_threshold,
        config.completeness_threshold,
        seed,
    );
    run_approximated_lstar(&mut sul, &mut (), &config).expect("learning terminates")
}

/// Every output H⁻ offers after a trace the reference can actually run must be
/// an output the reference can produce there.
fn assert_no_invented_outputs(h_minus: &IoltsMachine, reference: &IoltsMachine) {
    let mut frontier: Vec<(Trace, BTreeSet<StateId>)> =
        vec![(Trace::epsilon(), BTreeSet::from([h_minus.initial()]))];
    for _ in 0..WALK_DEPTH {
        let mut next = Vec::new();
        for (trace, states) in frontier {
            let reference_states = reference.run_all(&trace);
            if reference_states.is_empty() {
                // the reference rejects the trace, nothing left to compare
                continue;
            }
            let mut letters: BTreeSet<Letter> = BTreeSet::new();
            for id in &states {
                let state = h_minus.state(*id).expect("hypothesis state is live");
                for (letter, _) in state.edges() {
                    letters.insert(letter);
                }
            }
            for letter in letters {
                if letter.is_output() {
                    let possible = reference_states
                        .iter()
                        .any(|id| !reference.successors(*id, &letter).is_empty());
                    assert!(
                        possible,
                        "H- offers {letter} after {trace}, the model never does"
                    );
                }
                let mut reached = BTreeSet::new();
                for id in &states {
                    reached.extend(h_minus.successors(*id, &letter));
                }
                if !reached.is_empty() {
                    next.push((trace.extended(letter.clone()), reached));
                }
            }
        }
        frontier = next;
    }
}

/// Every trace of the reference (up to the walk depth) must be runnable on H⁺.
/// A branch that fell into the chaos sink counts as absorbed: chaos stands for
/// "behavior unknown here" and ends the obligation.
fn assert_everything_absorbed(h_plus: &IoltsMachine, reference: &IoltsMachine) {
    let chaos: BTreeSet<StateId> = ["Chaos", "ChaosQuiescence"]
        .iter()
        .filter_map(|name| h_plus.state_by_name(name))
        .collect();

    let mut traces = vec![Trace::epsilon()];
    for _ in 0..WALK_DEPTH {
        let mut next = Vec::new();
        for trace in &traces {
            let states = reference.run_all(trace);
            let hypothesis_states = h_plus.run_all(trace);
            let mut letters: BTreeSet<Letter> = BTreeSet::new();
            for id in &states {
                let state = reference.state(*id).expect("reference state is live");
                for (letter, _) in state.edges() {
                    letters.insert(letter);
                }
                if state.is_quiescent() {
                    letters.insert(Letter::Quiescence);
                }
            }
            for letter in letters {
                let extended = trace.extended(letter);
                if reference.run_all(&extended).is_empty() {
                    continue;
                }
                if h_plus.run_all(&extended).is_empty() {
                    assert!(
                        hypothesis_states.iter().any(|id| chaos.contains(id)),
                        "the model runs {extended} but H+ cannot absorb it"
                    );
                    continue;
                }
                next.push(extended);
            }
        }
        traces = next;
    }
}

#[test]
fn vending_machine_is_bracketed() {
    let reference = model("01_vending.dot");
    let learned = learn(reference.clone(), 41);

    assert_eq!(learned.h_minus.size(), 2);
    assert_eq!(learned.h_plus.size(), 2);
    assert_eq!(learned.h_star.size(), 2);
    assert!(learned.info.quiescence_reduced);

    assert_no_invented_outputs(&learned.h_minus, &reference);
    assert_everything_absorbed(&learned.h_plus, &reference);
}

#[test]
fn handshake_is_bracketed() {
    let reference = model("02_handshake.dot");
    let learned = learn(reference.clone(), 43);

    assert!(learned.h_minus.size() >= 2);
    assert!(learned.h_star.size() <= learned.h_plus.size());

    assert_no_invented_outputs(&learned.h_minus, &reference);
    assert_everything_absorbed(&learned.h_plus, &reference);
}
