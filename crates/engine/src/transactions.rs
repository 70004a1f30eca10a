//! Ledger records.
//!
//! A `Transaction` is one financial event: income, expense, a loan given out,
//! a repayment of such a loan, or a balance snapshot whose amount is derived
//! from every other row dated on or before it.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{EngineError, MoneyCents, Recurrence, recurrence::Frequency};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    Loan,
    Repayment,
    BalanceSnapshot,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Loan => "loan",
            Self::Repayment => "repayment",
            Self::BalanceSnapshot => "balance_snapshot",
        }
    }

    /// Sign applied to the amount when folding it into a balance.
    ///
    /// Snapshots are derived values and never contribute.
    pub fn sign(self) -> i64 {
        match self {
            Self::Income | Self::Repayment => 1,
            Self::Expense | Self::Loan => -1,
            Self::BalanceSnapshot => 0,
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "loan" => Ok(Self::Loan),
            "repayment" => Ok(Self::Repayment),
            "balance_snapshot" => Ok(Self::BalanceSnapshot),
            other => Err(EngineError::InvalidField(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

/// Settlement state of a loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Settled,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
        }
    }
}

impl TryFrom<&str> for LoanStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "settled" => Ok(Self::Settled),
            other => Err(EngineError::InvalidField(format!(
                "invalid loan status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub kind: TransactionKind,
    pub amount: MoneyCents,
    pub category_id: Option<i64>,
    pub description: String,
    pub effective_date: NaiveDate,
    /// `None` only for an aggregate balance snapshot.
    pub account_id: Option<i64>,
    /// The loan a repayment pays back.
    pub related_id: Option<i64>,
    pub status: Option<LoanStatus>,
    #[serde(default)]
    pub settled_override: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount with the balance sign of its kind applied.
    #[must_use]
    pub fn signed_amount(&self) -> MoneyCents {
        MoneyCents::new(self.amount.cents() * self.kind.sign())
    }

    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.kind == TransactionKind::BalanceSnapshot
    }

    #[must_use]
    pub fn is_pending_loan(&self) -> bool {
        self.kind == TransactionKind::Loan && self.status == Some(LoanStatus::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: String,
    pub amount_minor: i64,
    pub category_id: Option<i64>,
    pub description: String,
    pub effective_date: Date,
    pub account_id: Option<i64>,
    pub related_id: Option<i64>,
    pub status: Option<String>,
    pub settled_override: bool,
    pub tags: String,
    pub recurrence_frequency: Option<String>,
    pub recurrence_end: Option<Date>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Account,
    #[sea_orm(
        belongs_to = "super::categories::Entity",
        from = "Column::CategoryId",
        to = "super::categories::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Category,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::categories::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Transaction> for ActiveModel {
    fn from(tx: &Transaction) -> Self {
        let tags = serde_json::to_string(&tx.tags).unwrap_or_else(|_| "[]".to_string());
        Self {
            id: ActiveValue::Set(tx.id),
            kind: ActiveValue::Set(tx.kind.as_str().to_string()),
            amount_minor: ActiveValue::Set(tx.amount.cents()),
            category_id: ActiveValue::Set(tx.category_id),
            description: ActiveValue::Set(tx.description.clone()),
            effective_date: ActiveValue::Set(tx.effective_date),
            account_id: ActiveValue::Set(tx.account_id),
            related_id: ActiveValue::Set(tx.related_id),
            status: ActiveValue::Set(tx.status.map(|s| s.as_str().to_string())),
            settled_override: ActiveValue::Set(tx.settled_override),
            tags: ActiveValue::Set(tags),
            recurrence_frequency: ActiveValue::Set(
                tx.recurrence.map(|r| r.frequency.as_str().to_string()),
            ),
            recurrence_end: ActiveValue::Set(tx.recurrence.and_then(|r| r.end_date)),
            created_at: ActiveValue::Set(tx.created_at),
        }
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let tags: BTreeSet<String> = serde_json::from_str(&model.tags)?;
        let recurrence = match model.recurrence_frequency.as_deref() {
            Some(frequency) => Some(Recurrence {
                frequency: Frequency::try_from(frequency)?,
                end_date: model.recurrence_end,
            }),
            None => None,
        };
        Ok(Self {
            id: model.id,
            kind: TransactionKind::try_from(model.kind.as_str())?,
            amount: MoneyCents::new(model.amount_minor),
            category_id: model.category_id,
            description: model.description,
            effective_date: model.effective_date,
            account_id: model.account_id,
            related_id: model.related_id,
            status: model
                .status
                .as_deref()
                .map(LoanStatus::try_from)
                .transpose()?,
            settled_override: model.settled_override,
            tags,
            recurrence,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: TransactionKind, cents: i64) -> Transaction {
        Transaction {
            id: 7,
            kind,
            amount: MoneyCents::new(cents),
            category_id: Some(1),
            description: "rent".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            account_id: Some(1),
            related_id: None,
            status: None,
            settled_override: false,
            tags: BTreeSet::from(["home".to_string()]),
            recurrence: Some(Recurrence::new(Frequency::Monthly)),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn signed_amount_follows_kind() {
        assert_eq!(sample(TransactionKind::Income, 100).signed_amount().cents(), 100);
        assert_eq!(sample(TransactionKind::Repayment, 100).signed_amount().cents(), 100);
        assert_eq!(sample(TransactionKind::Expense, 100).signed_amount().cents(), -100);
        assert_eq!(sample(TransactionKind::Loan, 100).signed_amount().cents(), -100);
        assert_eq!(
            sample(TransactionKind::BalanceSnapshot, 100)
                .signed_amount()
                .cents(),
            0
        );
    }

    #[test]
    fn model_conversion_keeps_tags_and_recurrence() {
        let tx = sample(TransactionKind::Expense, 4200);
        let active = ActiveModel::from(&tx);
        let model = Model {
            id: 7,
            kind: "expense".to_string(),
            amount_minor: 4200,
            category_id: Some(1),
            description: "rent".to_string(),
            effective_date: tx.effective_date,
            account_id: Some(1),
            related_id: None,
            status: None,
            settled_override: false,
            tags: active.tags.clone().unwrap(),
            recurrence_frequency: active.recurrence_frequency.clone().unwrap(),
            recurrence_end: None,
            created_at: tx.created_at,
        };
        assert_eq!(Transaction::try_from(model).unwrap(), tx);
    }
}
