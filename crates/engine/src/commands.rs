//! Command and view structs for engine operations.
//!
//! These types group parameters for write operations (add/edit/resolve) and
//! shape what the engine hands back, keeping call sites readable and avoiding
//! long argument lists.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::{
    Account, LoanStatus, MoneyCents, Recurrence, Transaction, TransactionKind,
};

/// Tag carried by the income row produced when an overpayment is split.
pub const REFUND_TAG: &str = "refund";

/// A transaction to be recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: MoneyCents,
    pub category_id: Option<i64>,
    pub description: String,
    pub effective_date: NaiveDate,
    pub account_id: Option<i64>,
    pub related_id: Option<i64>,
    pub tags: BTreeSet<String>,
    pub recurrence: Option<Recurrence>,
}

impl NewTransaction {
    #[must_use]
    pub fn new(kind: TransactionKind, amount: MoneyCents, effective_date: NaiveDate) -> Self {
        Self {
            kind,
            amount,
            category_id: None,
            description: String::new(),
            effective_date,
            account_id: None,
            related_id: None,
            tags: BTreeSet::new(),
            recurrence: None,
        }
    }

    #[must_use]
    pub fn income(amount: MoneyCents, effective_date: NaiveDate) -> Self {
        Self::new(TransactionKind::Income, amount, effective_date)
    }

    #[must_use]
    pub fn expense(amount: MoneyCents, effective_date: NaiveDate) -> Self {
        Self::new(TransactionKind::Expense, amount, effective_date)
    }

    #[must_use]
    pub fn loan(amount: MoneyCents, effective_date: NaiveDate) -> Self {
        Self::new(TransactionKind::Loan, amount, effective_date)
    }

    /// A repayment of `loan_id`.
    #[must_use]
    pub fn repayment(loan_id: i64, amount: MoneyCents, effective_date: NaiveDate) -> Self {
        let mut tx = Self::new(TransactionKind::Repayment, amount, effective_date);
        tx.related_id = Some(loan_id);
        tx
    }

    #[must_use]
    pub fn account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }
}

/// Partial update of an existing transaction.
///
/// `None` leaves a field untouched. `kind` and `status` cannot be patched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub amount: Option<MoneyCents>,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub account_id: Option<i64>,
    pub related_id: Option<i64>,
    pub tags: Option<BTreeSet<String>>,
    /// `Some(None)` clears the recurrence.
    pub recurrence: Option<Option<Recurrence>>,
}

impl TransactionPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn amount(mut self, amount: MoneyCents) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn effective_date(mut self, effective_date: NaiveDate) -> Self {
        self.effective_date = Some(effective_date);
        self
    }

    #[must_use]
    pub fn account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn related(mut self, loan_id: i64) -> Self {
        self.related_id = Some(loan_id);
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    #[must_use]
    pub fn recurrence(mut self, recurrence: Option<Recurrence>) -> Self {
        self.recurrence = Some(recurrence);
        self
    }
}

/// What to do with a repayment larger than what is left on its loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverpaymentDecision {
    /// Record nothing.
    Reject,
    /// Record a repayment of the remaining amount and an income for the rest.
    Split,
}

/// A repayment that exceeds the remaining amount of its loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overpayment {
    pub loan_id: i64,
    /// Amount of the offending repayment.
    pub amount: MoneyCents,
    /// What was left on the loan, not counting the offending repayment.
    pub remaining: MoneyCents,
    /// `amount - remaining`.
    pub surplus: MoneyCents,
}

/// A request accepted by [`Engine::submit`](crate::Engine::submit).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRequest {
    Add(NewTransaction),
    ResolveOverpayment {
        tx: NewTransaction,
        decision: OverpaymentDecision,
    },
    Edit {
        id: i64,
        patch: TransactionPatch,
    },
    Delete(Vec<i64>),
    /// Force a loan to settled.
    Settle(i64),
    AdjustOverpayment(i64),
    ExecuteRecurrence(i64),
    StopRecurrence(i64),
    TakeSnapshot {
        /// `None` snapshots the total over every account.
        account_id: Option<i64>,
        date: NaiveDate,
        description: String,
    },
}

/// State handed back after a mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerView {
    /// Rows created or changed by the request, ascending by id.
    pub changed: Vec<Transaction>,
    /// Ids removed by the request.
    pub removed: Vec<i64>,
    /// Cached balance of every account.
    pub balances: Vec<Account>,
    pub total: MoneyCents,
}

/// Filter for [`Engine::query`](crate::Engine::query).
///
/// Every field is optional; set fields are combined with AND. Dates are
/// inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub kind: Option<TransactionKind>,
    pub category_id: Option<i64>,
    pub account_id: Option<i64>,
    pub status: Option<LoanStatus>,
    /// Case-insensitive match against description, category name and amount.
    pub text: Option<String>,
}

impl TransactionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, from: NaiveDate) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn to(mut self, to: NaiveDate) -> Self {
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    #[must_use]
    pub fn account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn status(mut self, status: LoanStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Extra free-text matcher supplied by the caller.
///
/// Consulted as an additional OR clause when a filter carries text.
pub trait TextMatcher: Send + Sync {
    fn matches(&self, tx: &Transaction, category: Option<&str>, needle: &str) -> bool;
}

/// Totals over a date range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodSummary {
    pub income: MoneyCents,
    pub expense: MoneyCents,
    pub loans: MoneyCents,
    pub repayments: MoneyCents,
    /// `income + repayments - expense - loans`.
    pub net: MoneyCents,
}

/// One budgeted category in a month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetLine {
    pub category_id: i64,
    pub category: String,
    pub month: NaiveDate,
    pub budget: MoneyCents,
    pub spent: MoneyCents,
    /// `budget - spent`, negative when over budget.
    pub remaining: MoneyCents,
}

/// A pending loan with its repayment progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoanSummary {
    pub loan: Transaction,
    pub repaid: MoneyCents,
    pub remaining: MoneyCents,
}
