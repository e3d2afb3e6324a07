//! Model-checker oracle backed by the mCRL2 toolchain.
//!
//! A hypothesis is converted into an mCRL2 process specification (inputs renamed
//! to `in_…`, outputs to `out_…`, quiescence kept as its own action), the
//! configured μ-calculus formula files are checked against it with
//! `mcrl22lps → lps2pbes → pbessolve`, and for a failed property the evidence
//! LPS is unrolled back into a counterexample trace via the DOT interchange
//! format. The formula files themselves are opaque to the learner.

use std::path::{Path, PathBuf};
use std::process::Command;

use itertools::Itertools;
use tracing::{debug, warn};

use iolts::{dot, IoltsMachine, Letter, Trace};

use super::oracle::{OracleError, PrecisionOracle, Violation};

/// Checks hypotheses against safety and liveness properties with mCRL2. The
/// `reference` is the model the properties are supposed to describe; it is used
/// by the start-up self-check only.
pub struct Mcrl2ModelChecker {
    reference: IoltsMachine,
    safety_properties: Vec<PathBuf>,
    liveness_properties: Vec<PathBuf>,
}

impl Mcrl2ModelChecker {
    pub fn new(reference: IoltsMachine) -> Self {
        Self {
            reference,
            safety_properties: Vec::new(),
            liveness_properties: Vec::new(),
        }
    }

    pub fn add_safety_property(&mut self, formula: impl Into<PathBuf>) {
        self.safety_properties.push(formula.into());
    }

    pub fn add_liveness_property(&mut self, formula: impl Into<PathBuf>) {
        self.liveness_properties.push(formula.into());
    }

    fn check(
        &self,
        model: &IoltsMachine,
        properties: &[PathBuf],
    ) -> Result<Vec<Violation>, OracleError> {
        let mut violations = Vec::new();
        for formula in properties {
            if let Some(trace) = holds(model, formula)? {
                debug!(formula = %formula.display(), %trace, "property violated");
                violations.push(Violation {
                    trace,
                    property: formula.display().to_string(),
                });
            }
        }
        Ok(violations)
    }
}

impl PrecisionOracle for Mcrl2ModelChecker {
    fn validate_properties(&mut self) -> Result<(), OracleError> {
        let properties = self
            .safety_properties
            .iter()
            .chain(self.liveness_properties.iter())
            .cloned()
            .collect_vec();
        for formula in properties {
            if let Some(trace) = holds(&self.reference, &formula)? {
                return Err(OracleError::SpecificationViolation {
                    property: formula.display().to_string(),
                    cause: format!("counterexample {trace}"),
                });
            }
        }
        Ok(())
    }

    fn find_safety_cex(
        &mut self,
        hypothesis: &IoltsMachine,
    ) -> Result<Vec<Violation>, OracleError> {
        self.check(hypothesis, &self.safety_properties)
    }

    fn find_liveness_cex(
        &mut self,
        hypothesis: &IoltsMachine,
    ) -> Result<Vec<Violation>, OracleError> {
        self.check(hypothesis, &self.liveness_properties)
    }
}

/// Renders a machine as an mCRL2 process specification.
pub fn process_text(model: &IoltsMachine) -> String {
    let actions = model
        .input_alphabet()
        .iter()
        .chain(model.output_alphabet().iter())
        .map(mcrl2_action)
        .chain(["QUIESCENCE".to_string()])
        .join(",\n");

    let processes = model
        .states()
        .map(|(_, state)| {
            let mut summands = state
                .edges()
                .map(|(letter, target)| {
                    let target = model.state(target).map_or("?", |s| s.name());
                    format!("{} . {}", mcrl2_action(&letter), target)
                })
                .collect_vec();
            if state.is_quiescent() && state.quiescence_targets().is_empty() {
                summands.push(format!("QUIESCENCE . {}", state.name()));
            }
            if summands.is_empty() {
                String::new()
            } else {
                format!("{} = {};\n", state.name(), summands.join(" + "))
            }
        })
        .join("");

    let initial = model
        .state(model.initial())
        .map_or("?", |s| s.name())
        .to_string();

    format!("act\n{actions};\nproc\n{processes}init\n {initial};\n")
}

fn mcrl2_action(letter: &Letter) -> String {
    match letter {
        Letter::Input(sym) => format!("in_{sym}"),
        Letter::Output(sym) => format!("out_{sym}"),
        Letter::Quiescence => "QUIESCENCE".to_string(),
    }
}

/// Checks a single formula; `None` means the property holds, otherwise the
/// extracted counterexample trace is returned.
fn holds(model: &IoltsMachine, formula: &Path) -> Result<Option<Trace>, OracleError> {
    let workdir = tempfile::tempdir()?;
    let base = workdir.path().join("model");
    let lps = base.with_extension("lps");
    let pbes = base.with_extension("pbes");

    std::fs::write(base.with_extension("mcrl2"), process_text(model))?;

    run(Command::new("mcrl22lps")
        .arg(base.with_extension("mcrl2"))
        .arg(&lps))?;
    run(Command::new("lps2pbes")
        .arg("-m")
        .arg("-s")
        .arg("-c")
        .arg(format!("--formula={}", formula.display()))
        .arg(&lps)
        .arg(&pbes))?;
    let verdict = run(Command::new("pbessolve")
        .arg("--search-strategy=breadth-first")
        .arg("--solve-strategy=1")
        .arg(format!("--file={}", lps.display()))
        .arg(&pbes))?;

    match verdict.trim() {
        "true" => Ok(None),
        "false" => {
            let evidence_lps = workdir.path().join("model.pbes.evidence.lps");
            let evidence_lts = workdir.path().join("model.pbes.evidence.lts");
            let evidence_dot = workdir.path().join("model.pbes.evidence.dot");
            run(Command::new("lps2lts").arg(&evidence_lps).arg(&evidence_lts))?;
            run(Command::new("ltsconvert").arg(&evidence_lts).arg(&evidence_dot))?;
            let evidence = evidence_machine(&std::fs::read_to_string(&evidence_dot)?)?;
            Ok(Some(evidence_trace(&evidence)))
        }
        other => Err(OracleError::Tool(format!(
            "pbessolve produced neither true nor false: {other:?}"
        ))),
    }
}

fn run(command: &mut Command) -> Result<String, OracleError> {
    let name = format!("{command:?}");
    let output = command.output()?;
    if !output.status.success() {
        warn!(%name, "mcrl2 tool failed");
        return Err(OracleError::Tool(format!(
            "{name} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Restores the `?`/`!` sigils the converter renamed away, marks the first node
/// as initial and parses the evidence automaton.
fn evidence_machine(dot_text: &str) -> Result<IoltsMachine, OracleError> {
    let restored = dot_text.replace("in_", "?").replace("out_", "!");
    let with_initial = match dot::parse(&restored) {
        Ok(machine) => machine,
        Err(dot::DotParseError::MissingInitial) => {
            let first_node = restored
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && !l.starts_with("digraph") && !l.contains("->"))
                .and_then(|l| l.split_whitespace().next())
                .unwrap_or("s0");
            let patched = restored.replace(
                '}',
                &format!("__start0 [label=\"\", shape=none];\n__start0 -> {first_node} [label=\"\"];\n}}"),
            );
            dot::parse(&patched)?
        }
        Err(err) => return Err(err.into()),
    };
    Ok(with_initial)
}

/// Unrolls the evidence automaton from its initial state, always following the
/// first transition, until a state repeats. The collected letters are the
/// counterexample trace.
fn evidence_trace(machine: &IoltsMachine) -> Trace {
    let mut current = machine.initial();
    let mut visited = std::collections::BTreeSet::from([current]);
    let mut letters = Vec::new();
    loop {
        let Some(state) = machine.state(current) else {
            break;
        };
        let Some((letter, target)) = state.edges().next() else {
            break;
        };
        letters.push(letter);
        if !visited.insert(target) {
            break;
        }
        current = target;
    }
    Trace::from(letters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iolts::IoltsBuilder;

    fn vending() -> IoltsMachine {
        IoltsBuilder::default()
            .with_name(0, "s0")
            .with_name(1, "s1")
            .with_transitions([
                (0, Letter::input("coin"), 1),
                (1, Letter::output("tea"), 0),
            ])
            .into_machine(0)
    }

    #[test]
    fn process_text_declares_actions_and_processes() {
        let text = process_text(&vending());
        assert!(text.starts_with("act\n"));
        assert!(text.contains("in_coin"));
        assert!(text.contains("out_tea"));
        assert!(text.contains("QUIESCENCE"));
        assert!(text.contains("s0 = in_coin . s1 + QUIESCENCE . s0;"));
        assert!(text.contains("s1 = out_tea . s0;"));
        assert!(text.trim_end().ends_with("init\n s0;"));
    }

    #[test]
    fn evidence_trace_stops_on_revisit() {
        let machine = vending();
        let trace = evidence_trace(&machine);
        assert_eq!(
            trace,
            Trace::from([Letter::input("coin"), Letter::output("tea")])
        );
    }
}
