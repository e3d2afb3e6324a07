use std::collections::BTreeMap;

use crate::{IoltsMachine, Letter, StateId};

/// Helper for the construction of [`IoltsMachine`]s from a list of edges over
/// integer state indices. States are created on demand and named after their
/// index, explicit names can be given with [`IoltsBuilder::with_name`].
///
/// # Example
///
/// A two-state vending machine that accepts a coin and then emits tea or coffee:
/// ```
/// use iolts::{IoltsBuilder, Letter};
///
/// let machine = IoltsBuilder::default()
///     .with_transitions([
///         (0, Letter::input("coin"), 1),
///         (1, Letter::output("tea"), 0),
///         (1, Letter::output("coffee"), 0),
///     ])
///     .into_machine(0);
/// assert_eq!(machine.size(), 2);
/// ```
#[derive(Debug, Default)]
pub struct IoltsBuilder {
    edges: Vec<(usize, Letter, usize)>,
    names: BTreeMap<usize, String>,
}

impl IoltsBuilder {
    /// Adds a list of `(source, letter, target)` edges. Edges are applied in the
    /// order in which they are given, which matters when an output edge follows
    /// an explicit δ edge on the same state.
    pub fn with_transitions<I>(mut self, edges: I) -> Self
    where
        I: IntoIterator<Item = (usize, Letter, usize)>,
    {
        self.edges.extend(edges);
        self
    }

    /// Overrides the name of the state with index `idx`.
    pub fn with_name(mut self, idx: usize, name: impl Into<String>) -> Self {
        self.names.insert(idx, name.into());
        self
    }

    /// Builds the machine with state `initial` as the initial state. States are
    /// numbered densely in the order of first appearance of their index.
    pub fn into_machine(self, initial: usize) -> IoltsMachine {
        let mut machine = IoltsMachine::new();
        let mut ids: BTreeMap<usize, StateId> = BTreeMap::new();
        let mut ensure = |machine: &mut IoltsMachine, idx: usize| {
            *ids.entry(idx).or_insert_with(|| {
                let name = self
                    .names
                    .get(&idx)
                    .cloned()
                    .unwrap_or_else(|| idx.to_string());
                machine.add_state(name)
            })
        };
        for (source, letter, target) in &self.edges {
            let s = ensure(&mut machine, *source);
            let t = ensure(&mut machine, *target);
            machine.add_transition(s, letter.clone(), t);
        }
        let initial = ensure(&mut machine, initial);
        machine.set_initial(initial);
        machine
    }
}
