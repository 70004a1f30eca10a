//! Calendar arithmetic for recurring templates.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

/// How often a recurring template fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Date of the occurrence following `from`.
    ///
    /// Months and years are calendar steps clamped to the end of the target
    /// month: Jan 31 + 1 month is Feb 29 in a leap year and Feb 28 otherwise,
    /// Feb 29 + 1 year is Feb 28.
    pub fn next(self, from: NaiveDate) -> ResultEngine<NaiveDate> {
        let next = match self {
            Self::Daily => from.checked_add_days(Days::new(1)),
            Self::Weekly => from.checked_add_days(Days::new(7)),
            Self::Monthly => from.checked_add_months(Months::new(1)),
            Self::Yearly => from.checked_add_months(Months::new(12)),
        };
        next.ok_or_else(|| EngineError::InvalidField(format!("no date after {from}")))
    }
}

impl TryFrom<&str> for Frequency {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(EngineError::InvalidField(format!(
                "invalid recurrence frequency: {other}"
            ))),
        }
    }
}

/// Recurrence attached to a template transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Last date an occurrence may fall on (inclusive).
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    #[must_use]
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            end_date: None,
        }
    }

    #[must_use]
    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Next occurrence after `from`, or `None` once it would pass the end date.
    pub fn next_within(&self, from: NaiveDate) -> ResultEngine<Option<NaiveDate>> {
        let next = self.frequency.next(from)?;
        match self.end_date {
            Some(end) if next > end => Ok(None),
            _ => Ok(Some(next)),
        }
    }
}
