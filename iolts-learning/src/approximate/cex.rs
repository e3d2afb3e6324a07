//! Counterexample resolution.
//!
//! A counterexample from the oracle is worked into the table by three cases,
//! tried in order over the whole batch: longest-prefix processing (the suffixes
//! of the counterexample behind its longest prefix that already is a row),
//! then all suffixes into E, then all prefixes into S. Each case remembers the
//! counterexamples it has already consumed so a violation that genuinely holds
//! on the black box cannot be "resolved" twice.

use std::collections::HashSet;

use tracing::debug;

use iolts::Trace;

use super::table::ObservationTable;

/// Per-case dedup caches. Cleared together with the table on a reset.
#[derive(Debug, Default)]
pub(crate) struct CexCaches {
    longest_prefix: HashSet<Trace>,
    suffixes: HashSet<Trace>,
    prefixes: HashSet<Trace>,
}

impl CexCaches {
    pub(crate) fn clear(&mut self) {
        self.longest_prefix.clear();
        self.suffixes.clear();
        self.prefixes.clear();
    }
}

/// The distinguishing suffixes obtained by cutting the longest row of the table
/// off the front of `cex`. With ε always present in S the cut always exists.
fn longest_prefix_suffixes(table: &ObservationTable, cex: &Trace) -> Vec<Trace> {
    let cut = table
        .rows()
        .into_iter()
        .filter(|row| cex.starts_with(row))
        .map(|row| row.len())
        .max()
        .unwrap_or(0);
    let remainder = Trace::from(cex[cut..].to_vec());
    remainder.suffixes().collect()
}

/// Tries to grow the table from the counterexample batch. Returns whether any
/// case added something new; `false` means the batch is exhausted.
pub(crate) fn resolve(
    counterexamples: &[Trace],
    table: &mut ObservationTable,
    caches: &mut CexCaches,
) -> bool {
    for cex in counterexamples {
        if caches.longest_prefix.insert(cex.clone()) {
            let suffixes = longest_prefix_suffixes(table, cex);
            let added = table.extend_e(suffixes);
            if !added.is_empty() {
                debug!(%cex, ?added, "longest-prefix processing extended E");
                return true;
            }
        }
    }
    for cex in counterexamples {
        if caches.suffixes.insert(cex.clone()) {
            let added = table.extend_e(cex.suffixes());
            if !added.is_empty() {
                debug!(%cex, ?added, "all suffixes extended E");
                return true;
            }
        }
    }
    for cex in counterexamples {
        if caches.prefixes.insert(cex.clone()) {
            let added = table.extend_s(cex.prefixes());
            if !added.is_empty() {
                debug!(%cex, ?added, "all prefixes extended S");
                return true;
            }
        }
    }
    false
}
