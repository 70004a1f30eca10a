//! Ledger consistency engine.
//!
//! Records income, expense, loan, repayment and balance-snapshot events and
//! keeps every derived value consistent under insertion, edit and deletion:
//! loan settlement, cached account balances and dated balance snapshots.
//! Every mutation is checkpointed first so it can be undone.

pub use accounts::Account;
pub use budgets::Budget;
pub use categories::{Category, CategoryKind};
pub use commands::{
    BudgetLine, LedgerView, LoanSummary, MutationRequest, NewTransaction, Overpayment,
    OverpaymentDecision, PeriodSummary, REFUND_TAG, TextMatcher, TransactionFilter,
    TransactionPatch,
};
pub use currency::CurrencyCode;
pub use dump::StoreDump;
pub use error::EngineError;
pub use history::{CheckpointHandle, DEFAULT_CAPACITY};
pub use money::MoneyCents;
pub use ops::{Engine, EngineBuilder};
pub use recurrence::{Frequency, Recurrence};
pub use session::Session;
pub use transactions::{LoanStatus, Transaction, TransactionKind};

pub mod accounts;
pub mod budgets;
pub mod categories;
mod commands;
mod currency;
mod dump;
mod error;
mod history;
mod money;
mod ops;
mod recurrence;
pub mod seal;
mod session;
pub mod transactions;
mod util;

pub type ResultEngine<T> = Result<T, EngineError>;
