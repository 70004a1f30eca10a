use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// An amount of money in cents.
///
/// Stored amounts are magnitudes: a transaction's direction comes from its
/// kind (see [`crate::Transaction::signed_amount`]). Running balances and
/// budget remainders may go negative.
///
/// ```rust
/// use engine::MoneyCents;
///
/// assert_eq!("12,5".parse::<MoneyCents>().unwrap(), MoneyCents::new(1250));
/// assert_eq!(MoneyCents::new(-705).to_string(), "-7.05");
/// assert!("1.005".parse::<MoneyCents>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MoneyCents(i64);

impl MoneyCents {
    pub const ZERO: MoneyCents = MoneyCents(0);

    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// What is left of a loan or budget never drops below zero.
    #[must_use]
    pub const fn non_negative(self) -> Self {
        if self.0 < 0 { Self::ZERO } else { self }
    }
}

impl fmt::Display for MoneyCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        f.pad(&format!("{sign}{}.{:02}", abs / 100, abs % 100))
    }
}

impl Add for MoneyCents {
    type Output = MoneyCents;

    fn add(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0 + rhs.0)
    }
}

impl AddAssign for MoneyCents {
    fn add_assign(&mut self, rhs: MoneyCents) {
        self.0 += rhs.0;
    }
}

impl Sub for MoneyCents {
    type Output = MoneyCents;

    fn sub(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0 - rhs.0)
    }
}

impl Sum for MoneyCents {
    fn sum<I: Iterator<Item = MoneyCents>>(iter: I) -> Self {
        iter.fold(MoneyCents::ZERO, Add::add)
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for MoneyCents {
    type Err = EngineError;

    /// Parse an amount as typed by a user: `12`, `12.5`, `12,50`, `-3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidAmount(format!("not an amount: {s:?}"));

        let text = s.trim();
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (units, fraction) = match digits.split_once(['.', ',']) {
            Some((units, fraction)) => (units, fraction),
            None => (digits, ""),
        };
        if !all_digits(units) || !(fraction.is_empty() || all_digits(fraction)) {
            return Err(invalid());
        }

        let fraction_cents = match fraction.len() {
            0 => 0,
            1 => i64::from(fraction.as_bytes()[0] - b'0') * 10,
            2 => fraction.parse::<i64>().map_err(|_| invalid())?,
            _ => {
                return Err(EngineError::InvalidAmount(format!(
                    "at most two decimals: {s:?}"
                )));
            }
        };
        let cents = units
            .parse::<i64>()
            .ok()
            .and_then(|units| units.checked_mul(100))
            .and_then(|cents| cents.checked_add(fraction_cents))
            .ok_or_else(|| EngineError::InvalidAmount(format!("amount too large: {s:?}")))?;

        Ok(MoneyCents(if negative { -cents } else { cents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<i64, EngineError> {
        s.parse::<MoneyCents>().map(MoneyCents::cents)
    }

    #[test]
    fn display_always_shows_cents() {
        assert_eq!(MoneyCents::new(0).to_string(), "0.00");
        assert_eq!(MoneyCents::new(7).to_string(), "0.07");
        assert_eq!(MoneyCents::new(1050).to_string(), "10.50");
        assert_eq!(MoneyCents::new(-1050).to_string(), "-10.50");
        assert_eq!(format!("{:>8}", MoneyCents::new(1)), "    0.01");
    }

    #[test]
    fn user_amounts() {
        assert_eq!(parse("12").unwrap(), 1200);
        assert_eq!(parse("12.5").unwrap(), 1250);
        assert_eq!(parse("12,50").unwrap(), 1250);
        assert_eq!(parse(" 0.01 ").unwrap(), 1);
        assert_eq!(parse("-3").unwrap(), -300);
        assert_eq!(parse("+1.00").unwrap(), 100);
        assert_eq!(parse("5.").unwrap(), 500);
    }

    #[test]
    fn rejected_amounts() {
        let rejected = [
            "", "-", "ten", "1.2.3", "1,2,3", "12.345", ".5", "1 000",
            "9223372036854775807",
        ];
        for text in rejected {
            assert!(
                matches!(parse(text), Err(EngineError::InvalidAmount(_))),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        let repaid: MoneyCents = [600, 700].into_iter().map(MoneyCents::new).sum();
        assert_eq!((MoneyCents::new(1_000) - repaid).non_negative(), MoneyCents::ZERO);
        assert_eq!(
            (MoneyCents::new(1_000) - MoneyCents::new(400)).non_negative(),
            MoneyCents::new(600)
        );
    }
}
