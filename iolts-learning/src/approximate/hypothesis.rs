//! Hypothesis construction from a stabilized observation table.
//!
//! All three hypotheses share the same skeleton: one state per equivalence class
//! of rows in S, the class of ε initial, input transitions following the table
//! and output transitions following the observed ε-cells. They differ in the
//! equivalence (row for H⁻, row⁺ for H⁺ and H★) and in how unknown behavior is
//! treated: H⁻ drops it, H⁺ routes it to the chaos sink, H★ additionally prunes
//! states that provably make no observable progress.

use std::collections::BTreeSet;

use itertools::Itertools;
use tracing::debug;

use iolts::{IoltsMachine, Letter, Trace};

use super::table::ObservationTable;

impl ObservationTable {
    /// The representatives of the row classes over S, first member in sorted
    /// order per class. The class of ε is always class 0.
    fn representatives(&self, plus: bool) -> Vec<Trace> {
        let mut reps: Vec<Trace> = Vec::new();
        for s in self.s_set() {
            let known = reps.iter().any(|r| {
                if plus {
                    self.row_plus_equals(r, s, false)
                } else {
                    self.row_equals(r, s)
                }
            });
            if !known {
                reps.push(s.clone());
            }
        }
        reps
    }

    fn class_of(&self, reps: &[Trace], t: &Trace, plus: bool) -> Option<usize> {
        reps.iter().position(|r| {
            if plus {
                self.row_plus_equals(r, t, false)
            } else {
                self.row_equals(r, t)
            }
        })
    }

    /// The under-approximation H⁻: only observed outputs produce transitions,
    /// quiescence stays implicit.
    pub fn gen_hypothesis_minus(&mut self) -> IoltsMachine {
        let epsilon = Trace::epsilon();
        let reps = self.representatives(false);
        let mut machine = IoltsMachine::new();
        let states = (0..reps.len())
            .map(|i| machine.add_state(format!("s{i}")))
            .collect_vec();
        machine.set_initial(states[0]);

        for (ci, rep) in reps.iter().enumerate() {
            for input in self.input_alphabet().to_vec() {
                let t = rep.extended(input.clone());
                if !self.is_defined(&t) {
                    continue;
                }
                if let Some(target) = self.class_of(&reps, &t, false) {
                    machine.add_transition(states[ci], input, states[target]);
                }
            }
            for letter in self.outputs_at(rep, &epsilon).clone() {
                if letter.is_quiescence() {
                    continue;
                }
                let t = rep.extended(letter.clone());
                if let Some(target) = self.class_of(&reps, &t, false) {
                    machine.add_transition(states[ci], letter, states[target]);
                }
            }
        }

        machine.remove_disconnected();
        debug!(states = machine.size(), "generated hypothesis H-");
        machine
    }

    /// The over-approximation H⁺: every output that was neither observed nor
    /// ruled out by a complete verdict leads into the chaos sink. With
    /// `quiescence_self_loops` the δ edges are spelled out even when they merely
    /// loop; without it only δ edges that change state are emitted.
    pub fn gen_hypothesis_plus(
        &mut self,
        with_chaos: bool,
        quiescence_self_loops: bool,
    ) -> IoltsMachine {
        let epsilon = Trace::epsilon();
        let reps = self.representatives(true);
        let mut machine = IoltsMachine::new();
        let states = (0..reps.len())
            .map(|i| machine.add_state(format!("s{i}")))
            .collect_vec();
        machine.set_initial(states[0]);

        let chaos = machine.add_state("Chaos");
        let chaos_quiescence = machine.add_state("ChaosQuiescence");
        for output in self.output_alphabet().to_vec() {
            machine.add_transition(chaos, output, chaos);
        }
        machine.add_quiescence(chaos, chaos_quiescence);
        machine.add_quiescence(chaos_quiescence, chaos_quiescence);

        for (ci, rep) in reps.iter().enumerate() {
            let source = states[ci];
            for input in self.input_alphabet().to_vec() {
                let t = rep.extended(input.clone());
                if !self.is_defined(&t) {
                    continue;
                }
                if let Some(target) = self.class_of(&reps, &t, true) {
                    machine.add_transition(source, input, states[target]);
                }
            }
            let unconfirmed = !self.complete_at(rep, &epsilon);
            for output in self.output_alphabet().to_vec() {
                if self.cell_contains(rep, &epsilon, &output) {
                    let t = rep.extended(output.clone());
                    if let Some(target) = self.class_of(&reps, &t, true) {
                        machine.add_transition(source, output, states[target]);
                    }
                } else if with_chaos && unconfirmed {
                    machine.add_transition(source, output, chaos);
                }
            }
            if self.cell_contains(rep, &epsilon, &Letter::Quiescence) {
                let t = rep.extended(Letter::Quiescence);
                if let Some(target) = self.class_of(&reps, &t, true) {
                    if quiescence_self_loops || states[target] != source {
                        machine.add_quiescence(source, states[target]);
                    }
                }
            } else if with_chaos && unconfirmed {
                machine.add_quiescence(source, chaos_quiescence);
            }
        }

        machine.remove_disconnected();
        debug!(states = machine.size(), with_chaos, "generated hypothesis H+");
        machine
    }

    /// The refined over-approximation H★: the chaos-free H⁺ with every state
    /// that some ⊥-marked trace reaches and that cannot make observable progress
    /// (no transition to a different state) removed.
    pub fn gen_hypothesis_star<'a>(
        &mut self,
        unreachable: impl IntoIterator<Item = &'a Trace>,
        quiescence_self_loops: bool,
    ) -> IoltsMachine {
        let mut machine = self.gen_hypothesis_plus(false, quiescence_self_loops);

        let mut doomed = BTreeSet::new();
        for word in unreachable {
            for id in machine.run_all(word) {
                if !machine.has_progress(id) {
                    doomed.insert(id);
                }
            }
        }
        for id in doomed {
            debug!(%id, "pruning state without observable progress");
            machine.remove_state(id);
        }

        machine.remove_disconnected();
        debug!(states = machine.size(), "generated hypothesis H*");
        machine
    }
}
