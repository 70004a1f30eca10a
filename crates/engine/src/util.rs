//! Internal helpers for input validation.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation so every write path rejects bad input the same way, before it
//! touches the database.

use chrono::NaiveDate;

use crate::{EngineError, MoneyCents, ResultEngine};

pub(crate) const MAX_DESCRIPTION_CHARS: usize = 100;

/// Trim a required name and reject it when empty.
pub(crate) fn normalize_required_name(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidField(format!(
            "{label} name must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Descriptions are limited to 100 Unicode scalar values.
pub(crate) fn validate_description(description: &str) -> ResultEngine<()> {
    let chars = description.chars().count();
    if chars > MAX_DESCRIPTION_CHARS {
        return Err(EngineError::DescriptionTooLong(chars));
    }
    Ok(())
}

pub(crate) fn validate_not_future(date: NaiveDate, today: NaiveDate) -> ResultEngine<()> {
    if date > today {
        return Err(EngineError::FutureDate { date, today });
    }
    Ok(())
}

pub(crate) fn validate_positive(amount: MoneyCents) -> ResultEngine<()> {
    if !amount.is_positive() {
        return Err(EngineError::InvalidAmount(format!(
            "amount must be > 0, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_counts_chars_not_bytes() {
        assert!(validate_description(&"é".repeat(100)).is_ok());
        assert_eq!(
            validate_description(&"a".repeat(101)),
            Err(EngineError::DescriptionTooLong(101))
        );
    }

    #[test]
    fn future_dates_are_rejected() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        assert!(validate_not_future(today, today).is_ok());
        assert_eq!(
            validate_not_future(tomorrow, today),
            Err(EngineError::FutureDate {
                date: tomorrow,
                today
            })
        );
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(normalize_required_name("  Cash ", "account").unwrap(), "Cash");
        assert!(normalize_required_name("   ", "account").is_err());
        assert_eq!(normalize_optional_text(Some("  ")), None);
        assert_eq!(normalize_optional_text(Some(" x ")), Some("x".to_string()));
    }

    #[test]
    fn amounts_must_be_positive() {
        assert!(validate_positive(MoneyCents::new(1)).is_ok());
        assert!(validate_positive(MoneyCents::ZERO).is_err());
        assert!(validate_positive(MoneyCents::new(-5)).is_err());
    }
}
