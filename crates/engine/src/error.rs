//! The module contains the errors the engine can throw.
//!
//! Validation failures ([`InvalidAmount`], [`FutureDate`],
//! [`DescriptionTooLong`], [`InvalidField`]) are always raised before any
//! write happens. Every other failure inside a mutation rolls the whole unit
//! back, so the caller observes the state it had before the call.
//!
//!  [`InvalidAmount`]: EngineError::InvalidAmount
//!  [`FutureDate`]: EngineError::FutureDate
//!  [`DescriptionTooLong`]: EngineError::DescriptionTooLong
//!  [`InvalidField`]: EngineError::InvalidField
use chrono::NaiveDate;
use sea_orm::DbErr;
use thiserror::Error;

use crate::commands::Overpayment;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Date {date} is after today ({today})")]
    FutureDate { date: NaiveDate, today: NaiveDate },
    #[error("Description too long: {0} characters (max 100)")]
    DescriptionTooLong(usize),
    #[error("Invalid field: {0}")]
    InvalidField(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Still referenced: {0}")]
    InUse(String),
    #[error("Pending loans cannot be deleted: {0:?}")]
    BlockedByPendingLoan(Vec<i64>),
    #[error("Recurrence of transaction {id} expired: next date {next} is after {end}")]
    RecurrenceExpired {
        id: i64,
        next: NaiveDate,
        end: NaiveDate,
    },
    #[error(
        "Repayment of {} exceeds the {} remaining on loan {}",
        .0.amount,
        .0.remaining,
        .0.loan_id
    )]
    OverpaymentDetected(Overpayment),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// `true` for errors raised by input validation, before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::FutureDate { .. }
                | Self::DescriptionTooLong(_)
                | Self::InvalidField(_)
                | Self::KeyNotFound(_)
                | Self::ExistingKey(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (
                Self::FutureDate { date: a, today: x },
                Self::FutureDate { date: b, today: y },
            ) => a == b && x == y,
            (Self::DescriptionTooLong(a), Self::DescriptionTooLong(b)) => a == b,
            (Self::InvalidField(a), Self::InvalidField(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InUse(a), Self::InUse(b)) => a == b,
            (Self::BlockedByPendingLoan(a), Self::BlockedByPendingLoan(b)) => a == b,
            (
                Self::RecurrenceExpired { id: a, next: x, end: m },
                Self::RecurrenceExpired { id: b, next: y, end: n },
            ) => a == b && x == y && m == n,
            (Self::OverpaymentDetected(a), Self::OverpaymentDetected(b)) => a == b,
            (Self::AuthenticationFailed, Self::AuthenticationFailed) => true,
            (Self::NothingToUndo, Self::NothingToUndo) => true,
            (Self::Storage(a), Self::Storage(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
