use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{self, Display};

use indexmap::IndexMap;
use itertools::Itertools;
use tracing::trace;

use crate::{Letter, Trace};

/// Index of a state in the arena of an [`IoltsMachine`]. Ids are handed out by the
/// machine and never reused, so a stale id stays invalid after its state was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A state of an [`IoltsMachine`]. Transitions are kept in three separate maps so
/// that the input/output/quiescence distinction stays an exhaustive match instead of
/// a string-prefix convention. Non-determinism is a set of successor ids per letter.
#[derive(Debug, Clone, Default)]
pub struct IoltsState {
    name: String,
    inputs: BTreeMap<Letter, BTreeSet<StateId>>,
    outputs: BTreeMap<Letter, BTreeSet<StateId>>,
    quiescence: BTreeSet<StateId>,
}

impl IoltsState {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A state is quiescent iff it enables no output.
    pub fn is_quiescent(&self) -> bool {
        self.outputs.values().all(|targets| targets.is_empty())
    }

    /// All enabled input edges, flattened to `(letter, target)` pairs.
    pub fn input_edges(&self) -> impl Iterator<Item = (&Letter, StateId)> + '_ {
        self.inputs
            .iter()
            .flat_map(|(letter, targets)| targets.iter().map(move |t| (letter, *t)))
    }

    /// All enabled output edges, flattened to `(letter, target)` pairs.
    pub fn output_edges(&self) -> impl Iterator<Item = (&Letter, StateId)> + '_ {
        self.outputs
            .iter()
            .flat_map(|(letter, targets)| targets.iter().map(move |t| (letter, *t)))
    }

    /// The explicit δ successors. An empty set does not mean δ is disabled; a
    /// quiescent state without explicit δ edges loops on itself implicitly.
    pub fn quiescence_targets(&self) -> &BTreeSet<StateId> {
        &self.quiescence
    }

    /// The successor set for a concrete letter. For δ this returns only the
    /// explicit edges, see [`IoltsMachine::successors`] for the implicit self-loop.
    pub fn targets(&self, letter: &Letter) -> BTreeSet<StateId> {
        match letter {
            Letter::Input(_) => self.inputs.get(letter).cloned().unwrap_or_default(),
            Letter::Output(_) => self.outputs.get(letter).cloned().unwrap_or_default(),
            Letter::Quiescence => self.quiescence.clone(),
        }
    }

    /// All edges of the state, δ edges reported under [`Letter::Quiescence`].
    pub fn edges(&self) -> impl Iterator<Item = (Letter, StateId)> + '_ {
        self.input_edges()
            .chain(self.output_edges())
            .map(|(letter, target)| (letter.clone(), target))
            .chain(self.quiescence.iter().map(|t| (Letter::Quiescence, *t)))
    }

    fn strip_target(&mut self, id: StateId) {
        for targets in self.inputs.values_mut().chain(self.outputs.values_mut()) {
            targets.remove(&id);
        }
        self.quiescence.remove(&id);
    }
}

/// An input/output labeled transition system with quiescence, stored as a dense
/// arena of states. All mutation goes through the machine so that the arena and
/// the transition sets stay in sync.
#[derive(Debug, Clone, Default)]
pub struct IoltsMachine {
    states: IndexMap<StateId, IoltsState>,
    initial: Option<StateId>,
    next_id: u32,
}

impl IoltsMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fresh state with the given name and returns its id.
    pub fn add_state(&mut self, name: impl Into<String>) -> StateId {
        let id = StateId(self.next_id);
        self.next_id += 1;
        self.states.insert(id, IoltsState::new(name.into()));
        id
    }

    pub fn set_initial(&mut self, id: StateId) {
        debug_assert!(self.states.contains_key(&id));
        self.initial = Some(id);
    }

    /// The designated initial state. Panics when the machine was built without one.
    pub fn initial(&self) -> StateId {
        self.initial
            .expect("machine has no initial state, set_initial was never called")
    }

    pub fn state(&self, id: StateId) -> Option<&IoltsState> {
        self.states.get(&id)
    }

    /// Iterates over all states in insertion order.
    pub fn states(&self) -> impl Iterator<Item = (StateId, &IoltsState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, state))
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// Looks a state up by its name.
    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .find_map(|(id, state)| (state.name == name).then_some(*id))
    }

    /// Adds a transition labelled by `letter`. Adding an output transition clears
    /// the explicit δ edges of the source, since enabling an output invalidates
    /// quiescence; generators that want both must add the δ edge afterwards.
    pub fn add_transition(&mut self, source: StateId, letter: Letter, target: StateId) {
        debug_assert!(self.states.contains_key(&target));
        let state = self
            .states
            .get_mut(&source)
            .expect("transition source must be part of the arena");
        match letter {
            Letter::Input(_) => {
                state.inputs.entry(letter).or_default().insert(target);
            }
            Letter::Output(_) => {
                state.quiescence.clear();
                state.outputs.entry(letter).or_default().insert(target);
            }
            Letter::Quiescence => {
                state.quiescence.insert(target);
            }
        }
    }

    /// Adds an explicit δ edge from `source` to `target`.
    pub fn add_quiescence(&mut self, source: StateId, target: StateId) {
        self.add_transition(source, Letter::Quiescence, target);
    }

    /// The successor set of `state` under `letter`. For δ on a quiescent state
    /// without explicit δ edges this is the implicit self-loop.
    pub fn successors(&self, state: StateId, letter: &Letter) -> BTreeSet<StateId> {
        let Some(s) = self.states.get(&state) else {
            return BTreeSet::new();
        };
        let mut targets = s.targets(letter);
        if letter.is_quiescence() && targets.is_empty() && s.is_quiescent() {
            targets.insert(state);
        }
        targets
    }

    /// The set of input letters appearing on any transition, sorted.
    pub fn input_alphabet(&self) -> Vec<Letter> {
        self.states
            .values()
            .flat_map(|s| s.inputs.keys().cloned())
            .sorted()
            .dedup()
            .collect()
    }

    /// The set of output letters appearing on any transition, sorted.
    pub fn output_alphabet(&self) -> Vec<Letter> {
        self.states
            .values()
            .flat_map(|s| s.outputs.keys().cloned())
            .sorted()
            .dedup()
            .collect()
    }

    /// Removes a state together with every edge pointing at it.
    pub fn remove_state(&mut self, id: StateId) {
        if self.states.shift_remove(&id).is_none() {
            return;
        }
        for state in self.states.values_mut() {
            state.strip_target(id);
        }
        if self.initial == Some(id) {
            self.initial = None;
        }
    }

    /// Removes every state that is not reachable from the initial state via any
    /// kind of transition.
    pub fn remove_disconnected(&mut self) {
        let Some(initial) = self.initial else {
            return;
        };
        let mut reachable = BTreeSet::from([initial]);
        let mut queue = VecDeque::from([initial]);
        while let Some(id) = queue.pop_front() {
            let Some(state) = self.states.get(&id) else {
                continue;
            };
            for (_, target) in state.edges() {
                if reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        let dead = self
            .states
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect_vec();
        for id in dead {
            trace!("removing disconnected state {id}");
            self.remove_state(id);
        }
    }

    /// The set of states reachable from the initial state under `trace`, resolving
    /// non-determinism exhaustively. A state without a matching transition simply
    /// drops out of the frontier; an empty result means the trace cannot be run.
    pub fn run_all(&self, word: &Trace) -> BTreeSet<StateId> {
        let Some(initial) = self.initial else {
            return BTreeSet::new();
        };
        let mut frontier = BTreeSet::from([initial]);
        for letter in word.iter() {
            frontier = frontier
                .into_iter()
                .flat_map(|id| self.successors(id, letter))
                .collect();
            if frontier.is_empty() {
                break;
            }
        }
        frontier
    }

    /// Whether the state has any transition leading to a different state.
    pub fn has_progress(&self, id: StateId) -> bool {
        self.states
            .get(&id)
            .is_some_and(|state| state.edges().any(|(_, target)| target != id))
    }

    /// Whether every state enables every input of the machine's input alphabet.
    pub fn is_input_complete(&self) -> bool {
        let alphabet = self.input_alphabet();
        self.states.values().all(|state| {
            alphabet
                .iter()
                .all(|i| state.inputs.get(i).is_some_and(|t| !t.is_empty()))
        })
    }

    /// Completes every state with input self-loops for the inputs it misses.
    pub fn make_input_complete(&mut self) {
        let alphabet = self.input_alphabet();
        let ids = self.states.keys().copied().collect_vec();
        for id in ids {
            for input in &alphabet {
                if self.successors(id, input).is_empty() {
                    self.add_transition(id, input.clone(), id);
                }
            }
        }
    }
}

impl Display for IoltsMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "iolts with {} states, initial {}",
            self.states.len(),
            self.initial
                .and_then(|id| self.state(id))
                .map_or("unset", |s| s.name())
        )?;
        for state in self.states.values() {
            let edges = state
                .edges()
                .map(|(letter, target)| {
                    format!(
                        "{letter} -> {}",
                        self.state(target).map_or("?", |s| s.name())
                    )
                })
                .join(", ");
            writeln!(f, "  {}: {}", state.name, edges)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoltsBuilder;

    fn coin_machine() -> IoltsMachine {
        IoltsBuilder::default()
            .with_transitions([
                (0, Letter::input("flip"), 1),
                (1, Letter::output("heads"), 0),
                (1, Letter::output("tails"), 0),
            ])
            .into_machine(0)
    }

    #[test]
    fn alphabets_and_quiescence() {
        let machine = coin_machine();
        assert_eq!(machine.input_alphabet(), vec![Letter::input("flip")]);
        assert_eq!(
            machine.output_alphabet(),
            vec![Letter::output("heads"), Letter::output("tails")]
        );
        let initial = machine.initial();
        assert!(machine.state(initial).unwrap().is_quiescent());
        let flipped = machine.successors(initial, &Letter::input("flip"));
        let q1 = *flipped.iter().next().unwrap();
        assert!(!machine.state(q1).unwrap().is_quiescent());
        // implicit δ self-loop on the quiescent initial state
        assert_eq!(
            machine.successors(initial, &Letter::Quiescence),
            BTreeSet::from([initial])
        );
        assert!(machine.successors(q1, &Letter::Quiescence).is_empty());
    }

    #[test]
    fn adding_an_output_clears_quiescence() {
        let mut machine = IoltsMachine::new();
        let a = machine.add_state("a");
        let b = machine.add_state("b");
        machine.set_initial(a);
        machine.add_quiescence(a, a);
        assert_eq!(machine.successors(a, &Letter::Quiescence), BTreeSet::from([a]));
        machine.add_transition(a, Letter::output("x"), b);
        assert!(machine.successors(a, &Letter::Quiescence).is_empty());
    }

    #[test]
    fn run_all_resolves_nondeterminism() {
        let machine = coin_machine();
        let trace = Trace::from([Letter::input("flip"), Letter::output("heads")]);
        assert_eq!(machine.run_all(&trace), BTreeSet::from([machine.initial()]));
        let rejected = Trace::from([Letter::output("heads")]);
        assert!(machine.run_all(&rejected).is_empty());
    }

    #[test_log::test]
    fn remove_disconnected_keeps_the_reachable_part() {
        let mut machine = coin_machine();
        let orphan = machine.add_state("orphan");
        machine.add_transition(orphan, Letter::input("flip"), orphan);
        assert_eq!(machine.size(), 3);
        machine.remove_disconnected();
        assert_eq!(machine.size(), 2);
        assert!(machine.state_by_name("orphan").is_none());
    }

    #[test]
    fn remove_state_strips_incoming_edges() {
        let mut machine = coin_machine();
        let q1 = machine.state_by_name("1").unwrap();
        machine.remove_state(q1);
        let initial = machine.initial();
        assert!(machine.successors(initial, &Letter::input("flip")).is_empty());
    }

    #[test]
    fn input_completion_adds_self_loops() {
        let mut machine = coin_machine();
        assert!(!machine.is_input_complete());
        machine.make_input_complete();
        assert!(machine.is_input_complete());
        let q1 = machine.state_by_name("1").unwrap();
        assert_eq!(
            machine.successors(q1, &Letter::input("flip")),
            BTreeSet::from([q1])
        );
    }
}
