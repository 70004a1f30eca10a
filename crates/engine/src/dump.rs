//! Full logical copy of the store.
//!
//! A dump is what a checkpoint and a sealed export contain: the schema
//! version plus every row of every table, serialized as JSON.

use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Statement, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    Account, Budget, Category, EngineError, ResultEngine, Transaction, accounts, budgets,
    categories, transactions,
};

const INSERT_CHUNK: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDump {
    pub schema_version: i64,
    pub taken_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub categories: Vec<Category>,
    pub budgets: Vec<Budget>,
    pub transactions: Vec<Transaction>,
}

/// Number of applied migrations, as recorded by the migrator.
pub(crate) async fn schema_version<C: ConnectionTrait>(db: &C) -> ResultEngine<i64> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT COUNT(*) AS version FROM seaql_migrations",
        ))
        .await?
        .ok_or_else(|| EngineError::Storage("missing migration table".to_string()))?;
    let version: i64 = row.try_get("", "version")?;
    Ok(version)
}

impl StoreDump {
    pub(crate) async fn capture<C: ConnectionTrait>(db: &C) -> ResultEngine<Self> {
        let schema_version = schema_version(db).await?;

        let accounts = accounts::Entity::find()
            .order_by_asc(accounts::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;
        let categories = categories::Entity::find()
            .order_by_asc(categories::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(Category::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;
        let budgets = budgets::Entity::find()
            .order_by_asc(budgets::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(Budget::from)
            .collect();
        let transactions = transactions::Entity::find()
            .order_by_asc(transactions::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        Ok(Self {
            schema_version,
            taken_at: Utc::now(),
            accounts,
            categories,
            budgets,
            transactions,
        })
    }

    /// Replace every row of the live store with the dump's rows.
    ///
    /// Must run inside a database transaction owned by the caller. Ids are
    /// written explicitly; the AUTOINCREMENT sequence never goes backwards, so
    /// rows created after the restore still get fresh ids.
    pub(crate) async fn restore<C: ConnectionTrait>(&self, db: &C) -> ResultEngine<()> {
        let current = schema_version(db).await?;
        if self.schema_version > current {
            return Err(EngineError::Storage(format!(
                "dump uses schema version {}, store is at {current}",
                self.schema_version
            )));
        }

        transactions::Entity::delete_many().exec(db).await?;
        budgets::Entity::delete_many().exec(db).await?;
        categories::Entity::delete_many().exec(db).await?;
        accounts::Entity::delete_many().exec(db).await?;

        for chunk in self.accounts.chunks(INSERT_CHUNK) {
            accounts::Entity::insert_many(chunk.iter().map(accounts::ActiveModel::from))
                .exec_without_returning(db)
                .await?;
        }
        for chunk in self.categories.chunks(INSERT_CHUNK) {
            categories::Entity::insert_many(chunk.iter().map(categories::ActiveModel::from))
                .exec_without_returning(db)
                .await?;
        }
        for chunk in self.budgets.chunks(INSERT_CHUNK) {
            budgets::Entity::insert_many(chunk.iter().map(budgets::ActiveModel::from))
                .exec_without_returning(db)
                .await?;
        }
        for chunk in self.transactions.chunks(INSERT_CHUNK) {
            transactions::Entity::insert_many(chunk.iter().map(transactions::ActiveModel::from))
                .exec_without_returning(db)
                .await?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> ResultEngine<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> ResultEngine<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
