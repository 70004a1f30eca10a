use chrono::{Local, NaiveDate};

/// Caller context passed to every mutating call.
///
/// `today` is the reference date for the "not in the future" rule; `user` is
/// only recorded in log spans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub today: NaiveDate,
}

impl Session {
    #[must_use]
    pub fn new(user: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            user: user.into(),
            today,
        }
    }

    /// Session dated with the local calendar day.
    #[must_use]
    pub fn now(user: impl Into<String>) -> Self {
        Self::new(user, Local::now().date_naive())
    }
}
