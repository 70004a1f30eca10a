#![allow(dead_code)]

use chrono::NaiveDate;
use engine::{
    CategoryKind, Engine, EngineBuilder, LedgerView, MoneyCents, MutationRequest, NewTransaction,
    Session,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn cents(value: i64) -> MoneyCents {
    MoneyCents::new(value)
}

pub fn session() -> Session {
    Session::new("alice", date(2024, 12, 31))
}

pub async fn database() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

/// An engine over a fresh store with one account and the seeded categories.
pub struct Ledger {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub session: Session,
    pub account: i64,
    pub salary: i64,
    pub dining: i64,
}

impl Ledger {
    pub async fn new() -> Self {
        Self::with(|builder| builder).await
    }

    pub async fn with(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        let db = database().await;
        let engine = configure(Engine::builder().database(db.clone()))
            .build()
            .await
            .unwrap();
        let session = session();
        let account = engine
            .create_account(&session, "Checking", None, None)
            .await
            .unwrap();
        let salary = category(&engine, CategoryKind::Income, "Salary").await;
        let dining = category(&engine, CategoryKind::Expense, "Dining").await;
        Self {
            engine,
            db,
            session,
            account,
            salary,
            dining,
        }
    }

    pub fn income(&self, amount: i64, on: NaiveDate) -> NewTransaction {
        NewTransaction::income(cents(amount), on)
            .account(self.account)
            .category(self.salary)
    }

    pub fn expense(&self, amount: i64, on: NaiveDate) -> NewTransaction {
        NewTransaction::expense(cents(amount), on)
            .account(self.account)
            .category(self.dining)
    }

    pub fn loan(&self, amount: i64, on: NaiveDate) -> NewTransaction {
        NewTransaction::loan(cents(amount), on)
            .account(self.account)
            .category(self.dining)
    }

    pub fn repayment(&self, loan_id: i64, amount: i64, on: NaiveDate) -> NewTransaction {
        NewTransaction::repayment(loan_id, cents(amount), on)
            .account(self.account)
            .category(self.salary)
    }

    pub async fn submit(&self, request: MutationRequest) -> LedgerView {
        self.engine.submit(&self.session, request).await.unwrap()
    }

    /// Add a transaction and return its id.
    pub async fn add(&self, tx: NewTransaction) -> i64 {
        let view = self.submit(MutationRequest::Add(tx)).await;
        view.changed
            .iter()
            .map(|tx| tx.id)
            .max()
            .unwrap()
    }

    pub async fn snapshot(&self, account_id: Option<i64>, on: NaiveDate) -> i64 {
        let view = self
            .submit(MutationRequest::TakeSnapshot {
                account_id,
                date: on,
                description: String::new(),
            })
            .await;
        view.changed[0].id
    }

    pub async fn balance(&self) -> MoneyCents {
        self.engine
            .balances()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.id == self.account)
            .unwrap()
            .balance
    }

    pub async fn amount(&self, id: i64) -> MoneyCents {
        self.engine.transaction(id).await.unwrap().amount
    }
}

pub async fn category(engine: &Engine, kind: CategoryKind, name: &str) -> i64 {
    engine
        .categories(Some(kind))
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.name == name)
        .unwrap()
        .id
}
