use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use itertools::Itertools;
use tracing::{debug, trace};

use iolts::{Letter, Trace};

use super::sul::{IoProcess, IoltsSul};

static EMPTY_OUTPUTS: BTreeSet<Letter> = BTreeSet::new();

/// One cell of the observation table: the letters observed after the cell's
/// trace, and whether that set is believed to be exhaustive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub outputs: BTreeSet<Letter>,
    pub complete: bool,
}

/// Inserts the traces that are not yet present into the sorted set, keeping the
/// length-then-lexicographic order, and returns exactly the newly added ones.
pub(crate) fn extend_set(set: &mut Vec<Trace>, new: impl IntoIterator<Item = Trace>) -> Vec<Trace> {
    let mut added = Vec::new();
    for candidate in new {
        if let Err(position) = set.binary_search(&candidate) {
            set.insert(position, candidate.clone());
            added.push(candidate);
        }
    }
    added
}

/// The two-layer observation table of the approximate learner.
///
/// Rows are indexed by the prefix set S and its one-letter extensions S·A, columns
/// by the suffix set E; both sets are kept sorted by length then lexicographically
/// so every traversal is deterministic. A cell records the observed outcome set
/// together with a completeness verdict, which is what distinguishes the row
/// (outputs only) from the row⁺ (outputs plus verdicts) equivalence.
pub struct ObservationTable {
    inputs: Vec<Letter>,
    outputs: Vec<Letter>,
    alphabet: Vec<Letter>,
    s: Vec<Trace>,
    e: Vec<Trace>,
    cells: HashMap<Trace, BTreeMap<Trace, Cell>>,
    defined: HashSet<Trace>,
}

impl ObservationTable {
    pub fn new(input_alphabet: Vec<Letter>, output_alphabet: Vec<Letter>) -> Self {
        let inputs = input_alphabet.into_iter().sorted().collect_vec();
        let outputs = output_alphabet.into_iter().sorted().collect_vec();
        let alphabet = inputs
            .iter()
            .chain(outputs.iter())
            .cloned()
            .chain([Letter::Quiescence])
            .collect_vec();
        Self {
            inputs,
            outputs,
            alphabet,
            s: vec![Trace::epsilon()],
            e: vec![Trace::epsilon()],
            cells: HashMap::new(),
            defined: HashSet::new(),
        }
    }

    /// Drops S, E and all cells, keeping only the alphabets. The sampling cache
    /// lives in the oracle and deliberately survives this.
    pub fn clear(&mut self) {
        self.s = vec![Trace::epsilon()];
        self.e = vec![Trace::epsilon()];
        self.cells.clear();
        self.defined.clear();
    }

    pub fn input_alphabet(&self) -> &[Letter] {
        &self.inputs
    }

    pub fn output_alphabet(&self) -> &[Letter] {
        &self.outputs
    }

    pub fn s_set(&self) -> &[Trace] {
        &self.s
    }

    pub fn e_set(&self) -> &[Trace] {
        &self.e
    }

    pub fn extend_s(&mut self, new: impl IntoIterator<Item = Trace>) -> Vec<Trace> {
        extend_set(&mut self.s, new)
    }

    pub fn extend_e(&mut self, new: impl IntoIterator<Item = Trace>) -> Vec<Trace> {
        extend_set(&mut self.e, new)
    }

    /// The one-letter extensions of S that are not themselves in S, sorted.
    pub fn s_dot_a(&self) -> Vec<Trace> {
        self.s
            .iter()
            .cartesian_product(self.alphabet.iter())
            .map(|(s, a)| s.extended(a.clone()))
            .filter(|t| self.s.binary_search(t).is_err())
            .sorted()
            .collect_vec()
    }

    /// S ∪ S·A in sorted order.
    pub fn rows(&self) -> Vec<Trace> {
        let mut rows = self.s.clone();
        rows.extend(self.s_dot_a());
        rows.sort();
        rows
    }

    pub(crate) fn cell(&self, s: &Trace, e: &Trace) -> Option<&Cell> {
        self.cells.get(s).and_then(|row| row.get(e))
    }

    pub(crate) fn outputs_at(&self, s: &Trace, e: &Trace) -> &BTreeSet<Letter> {
        self.cell(s, e).map_or(&EMPTY_OUTPUTS, |c| &c.outputs)
    }

    pub(crate) fn complete_at(&self, s: &Trace, e: &Trace) -> bool {
        self.cell(s, e).is_some_and(|c| c.complete)
    }

    pub(crate) fn cell_contains(&self, s: &Trace, e: &Trace, letter: &Letter) -> bool {
        self.outputs_at(s, e).contains(letter)
    }

    fn set_cell(&mut self, s: &Trace, e: &Trace, cell: Cell) {
        self.cells
            .entry(s.clone())
            .or_default()
            .insert(e.clone(), cell);
    }

    /// The validity predicate: whether observing `word` is possible at all given
    /// the table contents so far. Positive verdicts are memoized, a trace that is
    /// invalid today can become valid once more cells are filled.
    pub(crate) fn is_defined(&mut self, word: &Trace) -> bool {
        if self.defined.contains(word) {
            return true;
        }
        for prefix in word.prefixes().collect_vec() {
            if self.defined.contains(&prefix) {
                continue;
            }
            if !self.letter_allowed(&prefix) {
                return false;
            }
            self.defined.insert(prefix);
        }
        true
    }

    fn letter_allowed(&self, word: &Trace) -> bool {
        let Some((front, next)) = word.split_last() else {
            return true;
        };
        let prev = front.last();
        let epsilon = Trace::epsilon();
        let quiescence_in_cell = self.cell_contains(&front, &epsilon, &Letter::Quiescence);
        match next {
            Letter::Input(_) => match prev {
                None | Some(Letter::Output(_)) | Some(Letter::Quiescence) => true,
                Some(Letter::Input(_)) => quiescence_in_cell,
            },
            Letter::Output(_) => {
                matches!(prev, Some(Letter::Input(_)) | Some(Letter::Output(_)))
                    && self.cell_contains(&front, &epsilon, next)
            }
            Letter::Quiescence => {
                quiescence_in_cell && !matches!(prev, Some(Letter::Quiescence))
            }
        }
    }

    /// row(s₁) = row(s₂): equal observed outcome sets under every suffix in E.
    pub(crate) fn row_equals(&self, s1: &Trace, s2: &Trace) -> bool {
        self.e
            .iter()
            .all(|e| self.outputs_at(s1, e) == self.outputs_at(s2, e))
    }

    /// row⁺(s₁) = row⁺(s₂): row equality plus equal completeness verdicts.
    pub(crate) fn row_plus_equals(&self, s1: &Trace, s2: &Trace, skip_row_equals: bool) -> bool {
        (skip_row_equals || self.row_equals(s1, s2))
            && self
                .e
                .iter()
                .all(|e| self.complete_at(s1, e) == self.complete_at(s2, e))
    }

    fn show_cell(&self, s: &Trace, e: &Trace) -> String {
        format!(
            "({{{}}}, {})",
            self.outputs_at(s, e).iter().join(" "),
            if self.complete_at(s, e) {
                "complete"
            } else {
                "pending"
            }
        )
    }

    /// Brings every cell up to date by querying the sampling oracle.
    ///
    /// Completed cells are skipped. Cells whose trace ends in δ are fixed to
    /// `({δ}, complete)` since only an input could continue past a quiescence
    /// observation. A row `s·δ` whose prefix verdict is complete copies the
    /// prefix's cells, since δ loops on the observation it was made at.
    pub fn refresh<P: IoProcess>(&mut self, sul: &mut IoltsSul<P>) {
        let rows = self.rows();
        let suffixes = self.e.clone();
        let epsilon = Trace::epsilon();

        for s in &rows {
            for e in &suffixes {
                if self.cell(s, e).is_none() {
                    self.set_cell(s, e, Cell::default());
                }
            }
        }

        for s in &rows {
            for e in &suffixes {
                let word = s.concat(e);
                if !self.is_defined(&word) {
                    continue;
                }
                if self.complete_at(s, e) {
                    continue;
                }
                if word.last().is_some_and(Letter::is_quiescence) {
                    self.set_cell(
                        s,
                        e,
                        Cell {
                            outputs: BTreeSet::from([Letter::Quiescence]),
                            complete: true,
                        },
                    );
                    continue;
                }
                if let Some((front, last)) = s.split_last() {
                    if last.is_quiescence()
                        && self.cell_contains(&front, &epsilon, &Letter::Quiescence)
                        && self.complete_at(&front, &epsilon)
                    {
                        let copied = self.cell(&front, e).cloned().unwrap_or_default();
                        self.set_cell(s, e, copied);
                        continue;
                    }
                }
                if sul.query(&word, false).is_none() {
                    continue;
                }
                let outputs: BTreeSet<Letter> = sul.observed_at(&word).cloned().collect();
                let complete = sul.completeness_query(&word, &outputs);
                self.set_cell(s, e, Cell { outputs, complete });
                trace!(row = %s, column = %e, cell = %self.show_cell(s, e), "refreshed cell");
            }
        }
    }

    /// A table is closed when every valid one-letter extension of S has a row⁺
    /// twin inside S. Returns the first extension without one, in sorted order.
    pub fn is_globally_closed(&mut self) -> Option<Trace> {
        let candidates = self.rows();
        for t in candidates {
            if self.s.binary_search(&t).is_ok() || !self.is_defined(&t) {
                continue;
            }
            if !self
                .s
                .iter()
                .any(|s| self.row_plus_equals(&t, s, false))
            {
                debug!(row = %t, "table is not closed");
                return Some(t);
            }
        }
        None
    }

    /// A table is consistent when row-equal prefixes stay row-equal under every
    /// common extension, and row⁺-equal prefixes stay row⁺-equal. Returns the
    /// distinguishing suffix `a·e` together with a description of the clash.
    pub fn is_globally_consistent(&mut self) -> Option<(Trace, String)> {
        let s_list = self.s.clone();
        let alphabet = self.alphabet.clone();
        let suffixes = self.e.clone();

        for (s1, s2) in s_list.iter().cartesian_product(s_list.iter()) {
            if !self.row_equals(s1, s2) {
                continue;
            }
            let row_plus_eq = self.row_plus_equals(s1, s2, true);
            for a in &alphabet {
                let t1 = s1.extended(a.clone());
                let t2 = s2.extended(a.clone());
                if !self.is_defined(&t1) || !self.is_defined(&t2) {
                    continue;
                }
                for e in &suffixes {
                    let rows_differ = self.outputs_at(&t1, e) != self.outputs_at(&t2, e);
                    let verdicts_differ = row_plus_eq
                        && (rows_differ
                            || self.complete_at(&t1, e) != self.complete_at(&t2, e));
                    if rows_differ || verdicts_differ {
                        let suffix = Trace::letter(a.clone()).concat(e);
                        let cause = format!(
                            "{t1} · {e} => {} but {t2} · {e} => {}",
                            self.show_cell(&t1, e),
                            self.show_cell(&t2, e),
                        );
                        debug!(%suffix, cause = %cause, "table is not consistent");
                        return Some((suffix, cause));
                    }
                }
            }
        }
        None
    }

    /// Checks that every δ-successor is indistinguishable from its merge target
    /// under all common continuations: for rows s₁ with δ observed and a row s₂
    /// with row⁺(s₁·δ) = row⁺(s₂), the walk follows all common continuations and
    /// reports a witness trace whose suffixes separate the pair once the outcome
    /// sets at ε diverge.
    pub fn is_quiescence_reducible(&mut self) -> Option<(Trace, String)> {
        let s_list = self.s.clone();
        let epsilon = Trace::epsilon();
        let delta = Trace::letter(Letter::Quiescence);

        for s1 in &s_list {
            if !self.cell_contains(s1, &epsilon, &Letter::Quiescence) {
                continue;
            }
            let s1_delta = s1.concat(&delta);
            for s2 in &s_list {
                if !self.row_plus_equals(&s1_delta, s2, false) {
                    continue;
                }

                let mut wait = VecDeque::from([(s1.clone(), s2.clone(), Trace::epsilon())]);
                let mut past: HashSet<(Trace, Trace)> = HashSet::new();

                while let Some((u1, u2, t)) = wait.pop_front() {
                    if !past.insert((u1.clone(), u2.clone())) {
                        continue;
                    }
                    let u1_moves = self.continuations(&u1);
                    let u2_moves = self.continuations(&u2);

                    for a in u2_moves {
                        if !u1_moves.contains(&a) {
                            let cause = format!(
                                "after witness {t}: {a} is possible at {u2} => {} but not at {u1} => {}",
                                self.show_cell(&u2, &epsilon),
                                self.show_cell(&u1, &epsilon),
                            );
                            debug!(witness = %t, cause = %cause, "table is not quiescence reducible");
                            return Some((t, cause));
                        }
                        let v1 = self.class_member(&s_list, &u1.extended(a.clone()));
                        let v2 = self.class_member(&s_list, &u2.extended(a.clone()));
                        if let (Some(v1), Some(v2)) = (v1, v2) {
                            if v1 != v2 && !past.contains(&(v1.clone(), v2.clone())) {
                                wait.push_back((v1, v2, t.extended(a.clone())));
                            }
                        }
                    }
                }
            }
        }
        None
    }

    /// The moves the product walk considers at a row: its observed ε-cell letters
    /// followed by every input.
    fn continuations(&self, s: &Trace) -> Vec<Letter> {
        self.outputs_at(s, &Trace::epsilon())
            .iter()
            .cloned()
            .chain(self.inputs.iter().cloned())
            .collect_vec()
    }

    /// The member of S whose row equals the row of `t`, if any. The last match
    /// wins, mirroring how representatives shadow each other during merging.
    fn class_member(&self, s_list: &[Trace], t: &Trace) -> Option<Trace> {
        s_list
            .iter()
            .filter(|s| self.row_equals(s, t))
            .next_back()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximate::sul::SimulatedIolts;
    use iolts::IoltsBuilder;

    fn request_machine() -> SimulatedIolts {
        // q0 --?a--> q1 --!x--> q0, the initial state is quiescent
        SimulatedIolts::with_seed(
            IoltsBuilder::default()
                .with_transitions([(0, Letter::input("a"), 1), (1, Letter::output("x"), 0)])
                .into_machine(0),
            5,
        )
    }

    fn sul() -> IoltsSul<SimulatedIolts> {
        IoltsSul::with_seed(request_machine(), 0.99, 0.99, 5)
    }

    fn table() -> ObservationTable {
        ObservationTable::new(vec![Letter::input("a")], vec![Letter::output("x")])
    }

    /// Refresh/close/make-consistent until a fixed point, like the driver does.
    fn stabilize(table: &mut ObservationTable, sul: &mut IoltsSul<SimulatedIolts>) {
        for _ in 0..32 {
            table.refresh(sul);
            if let Some(row) = table.is_globally_closed() {
                table.extend_s([row]);
                continue;
            }
            if let Some((suffix, _)) = table.is_globally_consistent() {
                table.extend_e([suffix]);
                continue;
            }
            return;
        }
        panic!("table did not stabilize");
    }

    #[test]
    fn extend_set_keeps_sorted_order_and_reports_new() {
        let mut set = vec![Trace::epsilon()];
        let a = Trace::letter(Letter::input("a"));
        let ax = a.extended(Letter::output("x"));
        let added = extend_set(&mut set, [ax.clone(), a.clone(), ax.clone()]);
        assert_eq!(added, vec![ax.clone(), a.clone()]);
        assert_eq!(set, vec![Trace::epsilon(), a.clone(), ax]);
        assert!(extend_set(&mut set, [a]).is_empty());
    }

    #[test]
    fn validity_follows_the_letter_rules() {
        let mut table = table();
        let mut sul = sul();
        table.refresh(&mut sul);

        let a = Letter::input("a");
        let x = Letter::output("x");
        let d = Letter::Quiescence;

        assert!(table.is_defined(&Trace::epsilon()));
        assert!(table.is_defined(&Trace::letter(a.clone())));
        // δ is observable initially, so (δ) and (δ ?a) are valid
        assert!(table.is_defined(&Trace::letter(d.clone())));
        assert!(table.is_defined(&Trace::from([d.clone(), a.clone()])));
        // two δ in a row are never valid
        assert!(!table.is_defined(&Trace::from([d.clone(), d.clone()])));
        // an output is only valid once observed at its prefix
        assert!(table.is_defined(&Trace::from([a.clone(), x.clone()])));
        assert!(!table.is_defined(&Trace::from([a.clone(), Letter::output("y")])));
        // an output cannot start a trace and cannot follow δ
        assert!(!table.is_defined(&Trace::letter(x.clone())));
        assert!(!table.is_defined(&Trace::from([d.clone(), x.clone()])));
        // input after input requires δ at the intermediate cell; q1 is not quiescent
        assert!(!table.is_defined(&Trace::from([a.clone(), a.clone()])));
    }

    #[test]
    fn quiescence_cells_are_fixed_and_copied() {
        let mut table = table();
        let mut sul = sul();
        stabilize(&mut table, &mut sul);

        let epsilon = Trace::epsilon();
        let d = Trace::letter(Letter::Quiescence);
        let a = Trace::letter(Letter::input("a"));
        let ax = a.extended(Letter::output("x"));

        // (δ) cell is fixed to ({δ}, complete)
        let cell = table.cell(&d, &epsilon).unwrap();
        assert_eq!(cell.outputs, BTreeSet::from([Letter::Quiescence]));
        assert!(cell.complete);

        // ?a yields exactly !x, completely
        let cell = table.cell(&a, &epsilon).unwrap();
        assert_eq!(cell.outputs, BTreeSet::from([Letter::output("x")]));
        assert!(cell.complete);

        // after ?a !x the machine is back in the quiescent initial state
        let cell = table.cell(&ax, &epsilon).unwrap();
        assert_eq!(cell.outputs, BTreeSet::from([Letter::Quiescence]));
        assert!(cell.complete);
        assert!(table.row_plus_equals(&ax, &epsilon, false));

        // the δ row copies the ε row, so the table closes over it
        assert!(table.row_plus_equals(&d, &epsilon, false));
    }

    #[test]
    fn stabilized_request_table_is_closed_and_consistent() {
        let mut table = table();
        let mut sul = sul();
        stabilize(&mut table, &mut sul);
        assert!(table.is_globally_closed().is_none());
        assert!(table.is_globally_consistent().is_none());
        assert!(table.is_quiescence_reducible().is_none());
        // ε and ?a are distinguished, so S holds at least two row classes
        let a = Trace::letter(Letter::input("a"));
        assert!(!table.row_equals(&Trace::epsilon(), &a));
    }
}
