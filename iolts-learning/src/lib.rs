//! Active learning algorithms for input/output labeled transition systems.
//!
//! The [`approximate`] module contains the approximate L*-style learner for
//! non-deterministic, partially observable IOLTS with quiescence. Given only the
//! alphabets and the ability to run, feed and reset a black-box process, it
//! produces a pair of automata bracketing the true behavior (plus a refined
//! variant of the upper bracket), guided by a model-checker oracle.

pub mod approximate;

pub use approximate::{
    run_approximated_lstar, IoProcess, IoltsSul, Learned, LearningInfo, LstarConfig, LstarError,
    PrecisionOracle, SimulatedIolts, Violation,
};
