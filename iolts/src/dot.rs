//! Loading and storing machines in the DOT-like interchange dialect.
//!
//! The dialect is line based: every state is a `name [label="name"];` node, every
//! transition an `a -> b [label="?in"];` edge where inputs carry a `?` sigil,
//! outputs a `!` sigil and quiescence is the `QUIESCENCE` token. Repeated edges
//! with the same label encode non-determinism. The initial state is the target of
//! the edge leaving the `__start0` pseudo-node.

use std::fmt::Write as _;
use std::path::Path;

use bimap::BiMap;
use thiserror::Error;
use tracing::debug;

use crate::letter::UnsigiledLetter;
use crate::{IoltsMachine, Letter, StateId};

const START_NODE: &str = "__start0";

#[derive(Debug, Error)]
pub enum DotParseError {
    #[error("line {line}: edge {text:?} has no label attribute")]
    MissingLabel { line: usize, text: String },
    #[error("line {line}: {source}")]
    BadLetter {
        line: usize,
        source: UnsigiledLetter,
    },
    #[error("line {line}: malformed edge {text:?}")]
    MalformedEdge { line: usize, text: String },
    #[error("no initial state, the {START_NODE} edge is missing")]
    MissingInitial,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads a machine from the textual format.
pub fn parse(text: &str) -> Result<IoltsMachine, DotParseError> {
    let mut machine = IoltsMachine::new();
    let mut names: BiMap<String, StateId> = BiMap::new();
    let mut edges: Vec<(StateId, Letter, StateId)> = Vec::new();
    let mut initial = None;

    let mut ensure = |machine: &mut IoltsMachine, name: &str| -> StateId {
        if let Some(id) = names.get_by_left(name) {
            return *id;
        }
        let id = machine.add_state(name);
        names.insert(name.to_string(), id);
        id
    };

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let stmt = raw.trim().trim_end_matches(';').trim();
        if stmt.is_empty()
            || stmt.starts_with("digraph")
            || stmt.starts_with("//")
            || stmt == "}"
        {
            continue;
        }

        if let Some((lhs, rhs)) = stmt.split_once("->") {
            let source = lhs.trim();
            let target = rhs
                .trim()
                .split(|c: char| c.is_whitespace() || c == '[')
                .next()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| DotParseError::MalformedEdge {
                    line,
                    text: stmt.to_string(),
                })?;

            if source == START_NODE {
                initial = Some(ensure(&mut machine, target));
                continue;
            }

            let label = attribute(stmt, "label").ok_or_else(|| DotParseError::MissingLabel {
                line,
                text: stmt.to_string(),
            })?;
            let letter: Letter = label
                .parse()
                .map_err(|source| DotParseError::BadLetter { line, source })?;
            let source = ensure(&mut machine, source);
            let target = ensure(&mut machine, target);
            edges.push((source, letter, target));
        } else {
            let name = stmt
                .split(|c: char| c.is_whitespace() || c == '[')
                .next()
                .unwrap_or_default();
            if !name.is_empty() && name != START_NODE {
                ensure(&mut machine, name);
            }
        }
    }

    // δ edges last, adding an output clears explicit quiescence targets
    edges.sort_by_key(|(_, letter, _)| letter.is_quiescence());
    for (source, letter, target) in edges {
        machine.add_transition(source, letter, target);
    }

    let initial = initial.ok_or(DotParseError::MissingInitial)?;
    machine.set_initial(initial);
    debug!(
        states = machine.size(),
        "parsed machine from dot representation"
    );
    Ok(machine)
}

/// Reads a machine from a file in the textual format.
pub fn load(path: impl AsRef<Path>) -> Result<IoltsMachine, DotParseError> {
    parse(&std::fs::read_to_string(path)?)
}

/// Renders the machine in the textual format.
pub fn render(machine: &IoltsMachine) -> String {
    let mut out = String::from("digraph g {\n");
    for (_, state) in machine.states() {
        let _ = writeln!(out, "{} [label=\"{}\"];", state.name(), state.name());
    }
    for (_, state) in machine.states() {
        for (letter, target) in state.edges() {
            let target = machine.state(target).map_or("?", |s| s.name());
            let label = match &letter {
                Letter::Quiescence => "QUIESCENCE".to_string(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "{} -> {}  [label=\"{label}\"];", state.name(), target);
        }
    }
    let initial = machine
        .state(machine.initial())
        .map_or("?", |s| s.name())
        .to_string();
    let _ = writeln!(out, "{START_NODE} [label=\"\", shape=none];");
    let _ = writeln!(out, "{START_NODE} -> {initial}  [label=\"\"];");
    out.push_str("}\n");
    out
}

/// Writes the machine to a file in the textual format.
pub fn store(machine: &IoltsMachine, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
    std::fs::write(path, render(machine))
}

fn attribute<'a>(stmt: &'a str, key: &str) -> Option<&'a str> {
    let start = stmt.find(&format!("{key}=\""))? + key.len() + 2;
    let rest = &stmt[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}
