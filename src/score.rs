// score.rs - Score types
use std::fmt::{self, Debug, Display};
use std::ops::{Add, Neg, Sub};

/// Core trait for all score types.
///
/// Scores are integer based so that an incrementally maintained total is
/// exactly equal to a total recomputed from scratch.
pub trait Score:
    Copy
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Returns the "null" or zero score (the additive identity)
    fn null_score() -> Self;

    /// Returns the names of score fields for this score type
    fn get_fields() -> &'static [&'static str];

    /// Converts the score to a list of levels, most significant first
    fn as_list(&self) -> Vec<i64>;

    /// Creates a score from a list of levels; missing levels are zero
    fn from_list(values: &[i64]) -> Self;

    /// Multiplies every level by a scalar
    fn multiply(&self, scalar: i64) -> Self;

    /// Level-wise addition, `None` when any level overflows
    fn checked_add(&self, other: &Self) -> Option<Self> {
        let levels = self
            .as_list()
            .into_iter()
            .zip(other.as_list())
            .map(|(a, b)| a.checked_add(b))
            .collect::<Option<Vec<i64>>>()?;
        Some(Self::from_list(&levels))
    }

    /// Level-wise subtraction, `None` when any level overflows
    fn checked_sub(&self, other: &Self) -> Option<Self> {
        let levels = self
            .as_list()
            .into_iter()
            .zip(other.as_list())
            .map(|(a, b)| a.checked_sub(b))
            .collect::<Option<Vec<i64>>>()?;
        Some(Self::from_list(&levels))
    }

    fn checked_multiply(&self, scalar: i64) -> Option<Self> {
        let levels = self
            .as_list()
            .into_iter()
            .map(|v| v.checked_mul(scalar))
            .collect::<Option<Vec<i64>>>()?;
        Some(Self::from_list(&levels))
    }

    /// Returns the sum of absolute values of all score levels
    fn get_sum_abs(&self) -> i64 {
        self.as_list().iter().map(|v| v.abs()).sum()
    }

    /// Returns the most significant non-zero level
    fn get_priority_score(&self) -> i64 {
        self.as_list().into_iter().find(|v| *v != 0).unwrap_or(0)
    }

    /// A score is feasible when its first level is not negative
    fn is_feasible(&self) -> bool {
        self.as_list().first().map_or(true, |v| *v >= 0)
    }

    fn is_zero(&self) -> bool {
        *self == Self::null_score()
    }
}

/// Single level score
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimpleScore {
    pub simple_value: i64,
}

impl SimpleScore {
    pub const ZERO: SimpleScore = SimpleScore { simple_value: 0 };
    pub const ONE: SimpleScore = SimpleScore { simple_value: 1 };

    pub fn of(simple_value: i64) -> Self {
        Self { simple_value }
    }
}

impl Add for SimpleScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        SimpleScore::of(self.simple_value + other.simple_value)
    }
}

impl Sub for SimpleScore {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        SimpleScore::of(self.simple_value - other.simple_value)
    }
}

impl Neg for SimpleScore {
    type Output = Self;

    fn neg(self) -> Self {
        SimpleScore::of(-self.simple_value)
    }
}

impl Display for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_value)
    }
}

impl Score for SimpleScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["simple_value"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.simple_value]
    }

    fn from_list(values: &[i64]) -> Self {
        SimpleScore::of(values.first().copied().unwrap_or(0))
    }

    fn multiply(&self, scalar: i64) -> Self {
        SimpleScore::of(self.simple_value * scalar)
    }
}

impl From<i64> for SimpleScore {
    fn from(value: i64) -> Self {
        SimpleScore::of(value)
    }
}

/// Two level score; hard levels always outweigh soft levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardSoftScore {
    pub hard_score: i64,
    pub soft_score: i64,
}

impl HardSoftScore {
    pub const ZERO: HardSoftScore = HardSoftScore { hard_score: 0, soft_score: 0 };
    pub const ONE_HARD: HardSoftScore = HardSoftScore { hard_score: 1, soft_score: 0 };
    pub const ONE_SOFT: HardSoftScore = HardSoftScore { hard_score: 0, soft_score: 1 };

    pub fn of(hard_score: i64, soft_score: i64) -> Self {
        Self { hard_score, soft_score }
    }

    pub fn of_hard(hard_score: i64) -> Self {
        Self::of(hard_score, 0)
    }

    pub fn of_soft(soft_score: i64) -> Self {
        Self::of(0, soft_score)
    }
}

impl Add for HardSoftScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        HardSoftScore::of(
            self.hard_score + other.hard_score,
            self.soft_score + other.soft_score,
        )
    }
}

impl Sub for HardSoftScore {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        HardSoftScore::of(
            self.hard_score - other.hard_score,
            self.soft_score - other.soft_score,
        )
    }
}

impl Neg for HardSoftScore {
    type Output = Self;

    fn neg(self) -> Self {
        HardSoftScore::of(-self.hard_score, -self.soft_score)
    }
}

impl Display for HardSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hard/{}soft", self.hard_score, self.soft_score)
    }
}

impl Score for HardSoftScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.hard_score, self.soft_score]
    }

    fn from_list(values: &[i64]) -> Self {
        HardSoftScore::of(
            values.first().copied().unwrap_or(0),
            values.get(1).copied().unwrap_or(0),
        )
    }

    fn multiply(&self, scalar: i64) -> Self {
        HardSoftScore::of(self.hard_score * scalar, self.soft_score * scalar)
    }
}

/// Three level score
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardMediumSoftScore {
    pub hard_score: i64,
    pub medium_score: i64,
    pub soft_score: i64,
}

impl HardMediumSoftScore {
    pub const ZERO: HardMediumSoftScore = HardMediumSoftScore {
        hard_score: 0,
        medium_score: 0,
        soft_score: 0,
    };

    pub fn of(hard_score: i64, medium_score: i64, soft_score: i64) -> Self {
        Self { hard_score, medium_score, soft_score }
    }

    pub fn of_hard(hard_score: i64) -> Self {
        Self::of(hard_score, 0, 0)
    }

    pub fn of_medium(medium_score: i64) -> Self {
        Self::of(0, medium_score, 0)
    }

    pub fn of_soft(soft_score: i64) -> Self {
        Self::of(0, 0, soft_score)
    }
}

impl Add for HardMediumSoftScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        HardMediumSoftScore::of(
            self.hard_score + other.hard_score,
            self.medium_score + other.medium_score,
            self.soft_score + other.soft_score,
        )
    }
}

impl Sub for HardMediumSoftScore {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        HardMediumSoftScore::of(
            self.hard_score - other.hard_score,
            self.medium_score - other.medium_score,
            self.soft_score - other.soft_score,
        )
    }
}

impl Neg for HardMediumSoftScore {
    type Output = Self;

    fn neg(self) -> Self {
        HardMediumSoftScore::of(-self.hard_score, -self.medium_score, -self.soft_score)
    }
}

impl Display for HardMediumSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}hard/{}medium/{}soft",
            self.hard_score, self.medium_score, self.soft_score
        )
    }
}

impl Score for HardMediumSoftScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "medium_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.hard_score, self.medium_score, self.soft_score]
    }

    fn from_list(values: &[i64]) -> Self {
        HardMediumSoftScore::of(
            values.first().copied().unwrap_or(0),
            values.get(1).copied().unwrap_or(0),
            values.get(2).copied().unwrap_or(0),
        )
    }

    fn multiply(&self, scalar: i64) -> Self {
        HardMediumSoftScore::of(
            self.hard_score * scalar,
            self.medium_score * scalar,
            self.soft_score * scalar,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_levels_dominate() {
        assert!(HardSoftScore::of(-1, 100) < HardSoftScore::of(0, -100));
        assert!(HardMediumSoftScore::of(0, -1, 50) < HardMediumSoftScore::of(0, 0, 0));
    }

    #[test]
    fn test_multiply_and_negate() {
        let weight = HardSoftScore::of(2, 3);
        assert_eq!(weight.multiply(-4), HardSoftScore::of(-8, -12));
        assert_eq!(-weight + weight, HardSoftScore::ZERO);
    }

    #[test]
    fn test_list_conversion_and_display() {
        let score = HardMediumSoftScore::from_list(&[-1, 2]);
        assert_eq!(score.as_list(), vec![-1, 2, 0]);
        assert_eq!(score.to_string(), "-1hard/2medium/0soft");
        assert_eq!(score.get_priority_score(), -1);
        assert_eq!(score.get_sum_abs(), 3);
        assert!(!score.is_feasible());
        assert!(!SimpleScore::of(-3).is_feasible());
        assert!(HardSoftScore::of(0, -10).is_feasible());
    }
}
