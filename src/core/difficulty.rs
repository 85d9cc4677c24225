//! Network difficulty
//!
//! Cumulative proof-of-work is tracked as a plain non-negative integer.
//! Accumulation saturates instead of wrapping so a hostile peer can never
//! advertise a total difficulty that rolls over to a small value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Difficulty of a single block or of a whole chain
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Difficulty(u64);

/// Identity for difficulty accumulation
pub const ZERO_DIFFICULTY: Difficulty = Difficulty(0);

impl Difficulty {
    pub const fn from_num(num: u64) -> Self {
        Self(num)
    }

    pub const fn to_num(self) -> u64 {
        self.0
    }

    /// Saturating addition
    pub fn add(self, other: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_add(other.0))
    }
}

impl Add for Difficulty {
    type Output = Difficulty;

    fn add(self, rhs: Difficulty) -> Difficulty {
        Difficulty::add(self, rhs)
    }
}

impl From<u64> for Difficulty {
    fn from(num: u64) -> Self {
        Self(num)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_zero_is_identity() {
        let d = Difficulty::from_num(1000);
        assert_eq!(d + ZERO_DIFFICULTY, d);
        assert_eq!(ZERO_DIFFICULTY + d, d);
    }

    #[test]
    fn test_addition_saturates() {
        let max = Difficulty::from_num(u64::MAX);
        assert_eq!(max + Difficulty::from_num(1), max);
        assert_eq!(max.add(max).to_num(), u64::MAX);
    }

    #[test]
    fn test_ordering() {
        let low = Difficulty::from_num(10);
        let high = Difficulty::from_num(5000);
        assert_eq!(low.cmp(&high), Ordering::Less);
        assert_eq!(high.cmp(&low), Ordering::Greater);
        assert_eq!(low.cmp(&Difficulty::from(10)), Ordering::Equal);
    }
}
