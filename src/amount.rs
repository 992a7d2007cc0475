use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole number of loyalty tokens. Signed so that deltas and the
/// documented negative balances (reversals, admin debits) fit the same type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tokens(i64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    pub const fn new(value: i64) -> Self {
        Tokens(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `None` for `i64::MIN`, whose magnitude has no `Tokens` form.
    pub fn checked_abs(self) -> Option<Tokens> {
        self.0.checked_abs().map(Tokens)
    }

    pub fn checked_neg(self) -> Option<Tokens> {
        self.0.checked_neg().map(Tokens)
    }

    pub fn checked_add(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_add(rhs.0).map(Tokens)
    }
}

impl From<i64> for Tokens {
    fn from(value: i64) -> Self {
        Tokens(value)
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Tokens {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Tokens(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Tokens {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Tokens(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Tokens {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Tokens(-self.0)
    }
}

impl std::ops::AddAssign for Tokens {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Tokens {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Saturates instead of overflowing; totals are reporting figures.
impl std::iter::Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Self {
        iter.fold(Tokens::ZERO, |acc, t| Tokens(acc.0.saturating_add(t.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_plain_integer() {
        assert_eq!(Tokens::new(40).to_string(), "40");
        assert_eq!(Tokens::new(-20).to_string(), "-20");
        assert_eq!(Tokens::ZERO.to_string(), "0");
    }

    #[test]
    fn sign_predicates() {
        assert!(Tokens::new(1).is_positive());
        assert!(Tokens::new(-1).is_negative());
        assert!(Tokens::default().is_zero());
        assert!(!Tokens::ZERO.is_positive());
    }

    #[test]
    fn arithmetic() {
        let mut a = Tokens::new(100);
        a -= Tokens::new(40);
        assert_eq!(a, Tokens::new(60));
        a += Tokens::new(5);
        assert_eq!(a + Tokens::new(5), Tokens::new(70));
        assert_eq!(a - Tokens::new(70), Tokens::new(-5));
        assert_eq!(-a, Tokens::new(-65));
    }

    #[test]
    fn magnitude_of_debit() {
        assert_eq!(Tokens::new(-30).checked_abs(), Some(Tokens::new(30)));
        assert_eq!(Tokens::new(i64::MIN).checked_abs(), None);
        assert_eq!(Tokens::new(i64::MIN).checked_neg(), None);
        assert_eq!(Tokens::new(-8).checked_neg(), Some(Tokens::new(8)));
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert_eq!(Tokens::new(i64::MAX).checked_add(Tokens::new(1)), None);
        assert_eq!(
            Tokens::new(1).checked_add(Tokens::new(-3)),
            Some(Tokens::new(-2))
        );
    }

    #[test]
    fn sum_of_balances() {
        let total: Tokens = [10, -3, 25].into_iter().map(Tokens::new).sum();
        assert_eq!(total, Tokens::new(32));

        let total: Tokens = [i64::MAX, 1].into_iter().map(Tokens::new).sum();
        assert_eq!(total, Tokens::new(i64::MAX));
    }

    #[test]
    fn ordering() {
        assert!(Tokens::new(-100) < Tokens::ZERO);
        assert!(Tokens::new(39) < Tokens::new(40));
    }
}
