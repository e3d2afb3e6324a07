use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

/// A single symbol of the extended alphabet of an IOLTS. Inputs are chosen by the
/// environment, outputs are emitted spontaneously by the system and [`Letter::Quiescence`]
/// is the distinguished observation that no output will occur.
///
/// The variant order is significant: it fixes the traversal order of the extended
/// alphabet (inputs before outputs before quiescence) wherever letters are sorted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Letter {
    /// An input action, e.g. pressing a button. Rendered as `?sym`.
    Input(String),
    /// An output action, e.g. a light turning on. Rendered as `!sym`.
    Output(String),
    /// The absence of any output, usually written δ.
    Quiescence,
}

impl Letter {
    /// Creates an input letter from the bare symbol (without the `?` sigil).
    pub fn input(sym: impl Into<String>) -> Self {
        Letter::Input(sym.into())
    }

    /// Creates an output letter from the bare symbol (without the `!` sigil).
    pub fn output(sym: impl Into<String>) -> Self {
        Letter::Output(sym.into())
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Letter::Input(_))
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Letter::Output(_))
    }

    pub fn is_quiescence(&self) -> bool {
        matches!(self, Letter::Quiescence)
    }

    /// Returns the bare symbol, if `self` is not quiescence.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Letter::Input(sym) | Letter::Output(sym) => Some(sym),
            Letter::Quiescence => None,
        }
    }
}

impl Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Letter::Input(sym) => write!(f, "?{sym}"),
            Letter::Output(sym) => write!(f, "!{sym}"),
            Letter::Quiescence => write!(f, "δ"),
        }
    }
}

/// The error produced when parsing a [`Letter`] from its textual form fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("letter {0:?} carries neither a ?/! sigil nor is it the quiescence token")]
pub struct UnsigiledLetter(pub String);

impl FromStr for Letter {
    type Err = UnsigiledLetter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(sym) = s.strip_prefix('?') {
            return Ok(Letter::input(sym));
        }
        if let Some(sym) = s.strip_prefix('!') {
            return Ok(Letter::output(sym));
        }
        match s {
            "QUIESCENCE" | "quiescence" | "δ" => Ok(Letter::Quiescence),
            other => Err(UnsigiledLetter(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("?coin".parse(), Ok(Letter::input("coin")));
        assert_eq!("!tea".parse(), Ok(Letter::output("tea")));
        assert_eq!("QUIESCENCE".parse(), Ok(Letter::Quiescence));
        assert_eq!("quiescence".parse(), Ok(Letter::Quiescence));
        assert!("coin".parse::<Letter>().is_err());
        assert_eq!(Letter::input("coin").to_string(), "?coin");
        assert_eq!(Letter::Quiescence.to_string(), "δ");
    }

    #[test]
    fn variant_order_sorts_inputs_first() {
        let mut letters = vec![
            Letter::Quiescence,
            Letter::output("a"),
            Letter::input("z"),
            Letter::output("b"),
        ];
        letters.sort();
        assert_eq!(
            letters,
            vec![
                Letter::input("z"),
                Letter::output("a"),
                Letter::output("b"),
                Letter::Quiescence,
            ]
        );
    }
}
