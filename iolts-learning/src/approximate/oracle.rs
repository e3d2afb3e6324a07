use thiserror::Error;

use iolts::{IoltsMachine, Trace};

/// Errors of the model-checker oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("model checker invocation failed: {0}")]
    Tool(String),
    #[error("property {property} does not hold on the reference model: {cause}")]
    SpecificationViolation { property: String, cause: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Dot(#[from] iolts::dot::DotParseError),
}

/// A counterexample trace together with the property that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub trace: Trace,
    pub property: String,
}

/// The external model checker as the learner sees it: something that can search
/// a hypothesis for violations of its configured safety and liveness properties
/// and report them as traces over the hypothesis alphabet (δ included).
pub trait PrecisionOracle {
    /// Called once before learning starts. Implementations verify their
    /// configured properties against the reference they were built from; a
    /// failure is a user-configuration error, not a learning result.
    fn validate_properties(&mut self) -> Result<(), OracleError> {
        Ok(())
    }

    fn find_safety_cex(&mut self, hypothesis: &IoltsMachine)
        -> Result<Vec<Violation>, OracleError>;

    fn find_liveness_cex(
        &mut self,
        hypothesis: &IoltsMachine,
    ) -> Result<Vec<Violation>, OracleError>;
}

/// The trivial oracle without any properties; every hypothesis passes. Useful
/// for pure exploration runs where only the bracketing automata are of interest.
impl PrecisionOracle for () {
    fn find_safety_cex(
        &mut self,
        _hypothesis: &IoltsMachine,
    ) -> Result<Vec<Violation>, OracleError> {
        Ok(Vec::new())
    }

    fn find_liveness_cex(
        &mut self,
        _hypothesis: &IoltsMachine,
    ) -> Result<Vec<Violation>, OracleError> {
        Ok(Vec::new())
    }
}
