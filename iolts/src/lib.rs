//! Input/output labeled transition systems (IOLTS) with quiescence.
//!
//! An IOLTS distinguishes three kinds of actions: inputs chosen by the
//! environment, outputs emitted spontaneously by the system, and quiescence (δ),
//! the observable absence of any output. Transitions form a relation rather than
//! a function, so the same action may lead to several successor states.
//!
//! The crate provides the [`Letter`]/[`Trace`] vocabulary, the arena-backed
//! [`IoltsMachine`] with its mutation and reachability operations, a
//! [`IoltsBuilder`] for constructing machines in tests and examples, and the
//! [`dot`] module for the textual interchange format.

mod builder;
mod letter;
mod machine;
mod trace;

pub mod dot;

pub use builder::IoltsBuilder;
pub use letter::{Letter, UnsigiledLetter};
pub use machine::{IoltsMachine, IoltsState, StateId};
pub use trace::Trace;
