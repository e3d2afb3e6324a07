use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::ops::Deref;

use itertools::Itertools;

use crate::Letter;

/// A finite, ordered sequence of [`Letter`]s. The empty trace is ε.
///
/// Traces are ordered by length first and lexicographically within one length.
/// This is the canonical order in which the prefix and suffix sets of an
/// observation table are kept, so that successive runs with the same seed
/// traverse them identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Trace(Vec<Letter>);

impl Trace {
    /// The empty trace ε.
    pub fn epsilon() -> Self {
        Trace(Vec::new())
    }

    /// A trace consisting of a single letter.
    pub fn letter(letter: Letter) -> Self {
        Trace(vec![letter])
    }

    pub fn is_epsilon(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new trace with `letter` appended.
    pub fn extended(&self, letter: Letter) -> Self {
        let mut letters = self.0.clone();
        letters.push(letter);
        Trace(letters)
    }

    /// Returns the concatenation `self · other`.
    pub fn concat(&self, other: &Trace) -> Self {
        Trace(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    pub fn last(&self) -> Option<&Letter> {
        self.0.last()
    }

    /// Splits off the last letter, yielding the longest proper prefix and that letter.
    pub fn split_last(&self) -> Option<(Trace, &Letter)> {
        let (last, init) = self.0.split_last()?;
        Some((Trace(init.to_vec()), last))
    }

    /// The prefix consisting of the first `len` letters.
    pub fn prefix(&self, len: usize) -> Trace {
        Trace(self.0[..len].to_vec())
    }

    pub fn starts_with(&self, prefix: &Trace) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// All non-empty prefixes, shortest first.
    pub fn prefixes(&self) -> impl Iterator<Item = Trace> + '_ {
        (1..=self.0.len()).map(|n| self.prefix(n))
    }

    /// All non-empty suffixes, longest first.
    pub fn suffixes(&self) -> impl Iterator<Item = Trace> + '_ {
        (0..self.0.len()).map(|n| Trace(self.0[n..].to_vec()))
    }
}

impl Deref for Trace {
    type Target = [Letter];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Letter> for Trace {
    fn from_iter<T: IntoIterator<Item = Letter>>(iter: T) -> Self {
        Trace(iter.into_iter().collect())
    }
}

impl From<Vec<Letter>> for Trace {
    fn from(letters: Vec<Letter>) -> Self {
        Trace(letters)
    }
}

impl<const N: usize> From<[Letter; N]> for Trace {
    fn from(letters: [Letter; N]) -> Self {
        Trace(letters.to_vec())
    }
}

impl Ord for Trace {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Trace {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_epsilon() {
            write!(f, "ε")
        } else {
            write!(f, "{}", self.0.iter().join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Trace {
        Trace::from([Letter::input("a"), Letter::output("b"), Letter::Quiescence])
    }

    #[test]
    fn length_then_lex_order() {
        let short = Trace::letter(Letter::Quiescence);
        let long = Trace::from([Letter::input("a"), Letter::input("a")]);
        assert!(short < long, "a shorter trace sorts before any longer one");

        let left = Trace::from([Letter::input("a"), Letter::output("x")]);
        let right = Trace::from([Letter::input("b"), Letter::input("a")]);
        assert!(left < right, "equal lengths fall back to letter order");
    }

    #[test]
    fn prefixes_and_suffixes() {
        let t = abc();
        assert_eq!(t.prefixes().count(), 3);
        assert_eq!(t.prefixes().next().unwrap(), Trace::letter(Letter::input("a")));
        assert_eq!(t.suffixes().next().unwrap(), t);
        assert_eq!(
            t.suffixes().last().unwrap(),
            Trace::letter(Letter::Quiescence)
        );
        assert!(t.starts_with(&Trace::epsilon()));
        assert!(t.starts_with(&t.prefix(2)));
    }

    #[test]
    fn display() {
        assert_eq!(Trace::epsilon().to_string(), "ε");
        assert_eq!(abc().to_string(), "?a !b δ");
    }
}
