//! Human-oriented rendering of the observation table and the learning summary.

use std::fmt::{self, Display};

use itertools::Itertools;
use owo_colors::OwoColorize;
use tabled::builder::Builder;
use tabled::settings::Style;

use iolts::Trace;

use super::table::ObservationTable;
use super::LearningInfo;

/// Renders the observation table with one row per element of S ∪ S·A and one
/// column per suffix in E. Completed cells are shown green, extension rows dim.
pub fn render_observation_table(table: &ObservationTable) -> String {
    let mut builder = Builder::default();
    let header = std::iter::once("".to_string())
        .chain(table.e_set().iter().map(ToString::to_string))
        .collect_vec();
    builder.push_record(header);

    let s_set = table.s_set().to_vec();
    for row in table.rows() {
        let in_s = s_set.binary_search(&row).is_ok();
        let label = if in_s {
            row.to_string()
        } else {
            row.dimmed().to_string()
        };
        let mut record = vec![label];
        for e in table.e_set() {
            record.push(render_cell(table, &row, e));
        }
        builder.push_record(record);
    }

    builder.build().with(Style::sharp()).to_string()
}

fn render_cell(table: &ObservationTable, s: &Trace, e: &Trace) -> String {
    let Some(cell) = table.cell(s, e) else {
        return String::new();
    };
    let letters = cell.outputs.iter().join(" ");
    let text = format!("{{{letters}}}");
    if cell.complete {
        text.green().to_string()
    } else {
        text
    }
}

impl Display for LearningInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        let mut push = |key: &str, value: String| {
            builder.push_record([key.to_string(), value]);
        };
        push("learning rounds", self.learning_rounds.to_string());
        push("resets", self.resets.to_string());
        push("states H-", self.h_minus_states.to_string());
        push("states H+", self.h_plus_states.to_string());
        push("states H*", self.h_star_states.to_string());
        push("|S| / |E|", format!("{} / {}", self.s_size, self.e_size));
        push("cache entries", self.cache_size.to_string());
        push("quiescence reduced", self.quiescence_reduced.to_string());
        push("total time", format!("{:.2?}", self.total_time));
        push("learning time", format!("{:.2?}", self.learning_time));
        push("checking time", format!("{:.2?}", self.checking_time));
        push("query threshold", format!("{}", self.query_threshold));
        push(
            "completeness threshold",
            format!("{}", self.completeness_threshold),
        );
        let b = self.counters.learning;
        push(
            "learning queries/cached/steps/listens",
            format!("{} / {} / {} / {}", b.queries, b.cached_queries, b.steps, b.listens),
        );
        let b = self.counters.completeness;
        push(
            "completeness queries/cached/steps/listens",
            format!("{} / {} / {} / {}", b.queries, b.cached_queries, b.steps, b.listens),
        );
        write!(f, "{}", builder.build().with(Style::sharp()))
    }
}
