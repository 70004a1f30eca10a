use std::collections::{BTreeSet, HashMap};

use chrono::{Months, NaiveDate};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, Statement, TransactionTrait, Value,
    prelude::*,
};
use tracing::{debug, info};

use crate::{
    Account, BudgetLine, EngineError, MoneyCents, PeriodSummary, ResultEngine, Session,
    Transaction, TransactionKind, accounts, budgets, budgets::month_start, categories,
    transactions,
};

use super::{Changes, Engine, with_tx};

/// Signed contribution of one row, in SQL.
const SIGNED_AMOUNT_SQL: &str = "CASE kind \
     WHEN 'income' THEN amount_minor \
     WHEN 'repayment' THEN amount_minor \
     WHEN 'expense' THEN -amount_minor \
     WHEN 'loan' THEN -amount_minor \
     ELSE 0 END";

/// What a mutation touched, and therefore what has to be recomputed.
#[derive(Debug, Default)]
pub(crate) struct Impact {
    /// Snapshots dated on or after this day are recomputed.
    since: Option<NaiveDate>,
    accounts: BTreeSet<i64>,
    loans: BTreeSet<i64>,
}

impl Impact {
    /// Record a row as it was before or after the mutation.
    pub(crate) fn touch(&mut self, tx: &Transaction) {
        self.touch_date(tx.effective_date);
        if tx.is_snapshot() {
            return;
        }
        if let Some(account_id) = tx.account_id {
            self.accounts.insert(account_id);
        }
        match tx.kind {
            TransactionKind::Loan => {
                self.loans.insert(tx.id);
            }
            TransactionKind::Repayment => {
                if let Some(loan_id) = tx.related_id {
                    self.loans.insert(loan_id);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn touch_date(&mut self, date: NaiveDate) {
        self.since = Some(self.since.map_or(date, |since| since.min(date)));
    }

    pub(crate) fn touch_loan(&mut self, loan_id: i64) {
        self.loans.insert(loan_id);
    }

    /// Everything: every account, every loan, every snapshot.
    async fn everything<C: ConnectionTrait>(db: &C) -> ResultEngine<Self> {
        let accounts = accounts::Entity::find()
            .all(db)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        let loans = transactions::Entity::find()
            .filter(transactions::Column::Kind.eq(TransactionKind::Loan.as_str()))
            .all(db)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        Ok(Self {
            since: Some(NaiveDate::MIN),
            accounts,
            loans,
        })
    }
}

/// Signed sum of non-snapshot rows, optionally scoped to one account and/or
/// to rows dated on or before `upto`.
pub(crate) async fn signed_sum<C: ConnectionTrait>(
    db: &C,
    account_id: Option<i64>,
    upto: Option<NaiveDate>,
) -> ResultEngine<MoneyCents> {
    let mut sql = format!(
        "SELECT COALESCE(SUM({SIGNED_AMOUNT_SQL}), 0) AS total FROM transactions \
         WHERE kind <> 'balance_snapshot'"
    );
    let mut values: Vec<Value> = Vec::new();
    if let Some(account_id) = account_id {
        sql.push_str(" AND account_id = ?");
        values.push(account_id.into());
    }
    if let Some(upto) = upto {
        sql.push_str(" AND effective_date <= ?");
        values.push(upto.into());
    }
    let row = db
        .query_one(Statement::from_sql_and_values(
            db.get_database_backend(),
            sql,
            values,
        ))
        .await?
        .ok_or_else(|| EngineError::Storage("empty aggregate".to_string()))?;
    let total: i64 = row.try_get("", "total")?;
    Ok(MoneyCents::new(total))
}

impl Engine {
    /// Recompute everything `impact` names: loan statuses, cached account
    /// balances and every snapshot dated on or after `impact.since`.
    ///
    /// Returns the ids of rows whose stored values changed.
    pub(crate) async fn cascade<C: ConnectionTrait>(
        &self,
        db: &C,
        impact: &Impact,
    ) -> ResultEngine<BTreeSet<i64>> {
        let mut changed = BTreeSet::new();

        for loan_id in &impact.loans {
            if self.refresh_status_in(db, *loan_id).await? {
                changed.insert(*loan_id);
            }
        }

        for account_id in &impact.accounts {
            let Some(model) = accounts::Entity::find_by_id(*account_id).one(db).await? else {
                continue;
            };
            let balance = signed_sum(db, Some(*account_id), None).await?;
            if model.balance != balance.cents() {
                debug!(account_id, %balance, "account balance refreshed");
                accounts::ActiveModel {
                    id: ActiveValue::Set(*account_id),
                    balance: ActiveValue::Set(balance.cents()),
                    ..Default::default()
                }
                .update(db)
                .await?;
            }
        }

        if let Some(since) = impact.since {
            changed.extend(self.walk_snapshots(db, since).await?);
        }
        Ok(changed)
    }

    /// One ordered pass over rows and snapshots from `since` on.
    ///
    /// Rows dated before `since` are folded into per-account opening totals
    /// with a single aggregate; rows up to the last affected snapshot are then
    /// read once in date order while snapshots are visited in date order.
    async fn walk_snapshots<C: ConnectionTrait>(
        &self,
        db: &C,
        since: NaiveDate,
    ) -> ResultEngine<Vec<i64>> {
        let snapshots = transactions::Entity::find()
            .filter(transactions::Column::Kind.eq(TransactionKind::BalanceSnapshot.as_str()))
            .filter(transactions::Column::EffectiveDate.gte(since))
            .order_by_asc(transactions::Column::EffectiveDate)
            .order_by_asc(transactions::Column::Id)
            .all(db)
            .await?;
        let Some(last) = snapshots.last() else {
            return Ok(Vec::new());
        };
        let until = last.effective_date;

        let mut per_account: HashMap<i64, i64> = HashMap::new();
        let mut total: i64 = 0;

        let opening = db
            .query_all(Statement::from_sql_and_values(
                db.get_database_backend(),
                format!(
                    "SELECT account_id, SUM({SIGNED_AMOUNT_SQL}) AS total FROM transactions \
                     WHERE kind <> 'balance_snapshot' AND effective_date < ? \
                     GROUP BY account_id"
                ),
                [since.into()],
            ))
            .await?;
        for row in opening {
            let account_id: Option<i64> = row.try_get("", "account_id")?;
            let sum: i64 = row.try_get("", "total")?;
            total += sum;
            if let Some(account_id) = account_id {
                *per_account.entry(account_id).or_default() += sum;
            }
        }

        let rows = transactions::Entity::find()
            .filter(transactions::Column::Kind.ne(TransactionKind::BalanceSnapshot.as_str()))
            .filter(transactions::Column::EffectiveDate.gte(since))
            .filter(transactions::Column::EffectiveDate.lte(until))
            .order_by_asc(transactions::Column::EffectiveDate)
            .all(db)
            .await?;

        let mut changed = Vec::new();
        let mut rows = rows.into_iter().peekable();
        for snapshot in snapshots {
            while let Some(row) = rows.next_if(|r| r.effective_date <= snapshot.effective_date) {
                let kind = TransactionKind::try_from(row.kind.as_str())?;
                let signed = row.amount_minor * kind.sign();
                total += signed;
                if let Some(account_id) = row.account_id {
                    *per_account.entry(account_id).or_default() += signed;
                }
            }

            let expected = match snapshot.account_id {
                Some(account_id) => per_account.get(&account_id).copied().unwrap_or(0),
                None => total,
            };
            if snapshot.amount_minor != expected {
                debug!(
                    snapshot_id = snapshot.id,
                    old = snapshot.amount_minor,
                    new = expected,
                    "snapshot recomputed"
                );
                transactions::ActiveModel {
                    id: ActiveValue::Set(snapshot.id),
                    amount_minor: ActiveValue::Set(expected),
                    ..Default::default()
                }
                .update(db)
                .await?;
                changed.push(snapshot.id);
            }
        }
        Ok(changed)
    }

    /// Record a balance snapshot for one account, or for all accounts when
    /// `account_id` is `None`.
    pub(crate) async fn snapshot_in<C: ConnectionTrait>(
        &self,
        db: &C,
        session: &Session,
        account_id: Option<i64>,
        date: NaiveDate,
        description: &str,
    ) -> ResultEngine<Changes> {
        crate::util::validate_description(description)?;
        crate::util::validate_not_future(date, session.today)?;
        if let Some(account_id) = account_id {
            self.require_account(db, account_id).await?;
        }

        let amount = signed_sum(db, account_id, Some(date)).await?;
        let model = transactions::ActiveModel {
            id: ActiveValue::NotSet,
            kind: ActiveValue::Set(TransactionKind::BalanceSnapshot.as_str().to_string()),
            amount_minor: ActiveValue::Set(amount.cents()),
            category_id: ActiveValue::Set(None),
            description: ActiveValue::Set(description.trim().to_string()),
            effective_date: ActiveValue::Set(date),
            account_id: ActiveValue::Set(account_id),
            related_id: ActiveValue::Set(None),
            status: ActiveValue::Set(None),
            settled_override: ActiveValue::Set(false),
            tags: ActiveValue::Set("[]".to_string()),
            recurrence_frequency: ActiveValue::Set(None),
            recurrence_end: ActiveValue::Set(None),
            created_at: ActiveValue::Set(chrono::Utc::now()),
        }
        .insert(db)
        .await?;

        let mut changes = Changes::default();
        changes.changed.insert(model.id);
        Ok(changes)
    }

    /// Cached balance of every account, ordered by id.
    pub async fn balances(&self) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .order_by_asc(accounts::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    /// Sum of every account's cached balance.
    pub async fn total_balance(&self) -> ResultEngine<MoneyCents> {
        Ok(self.balances().await?.iter().map(|a| a.balance).sum())
    }

    /// Total over all accounts of every row dated on or before `date`.
    pub async fn total_balance_as_of(&self, date: NaiveDate) -> ResultEngine<MoneyCents> {
        signed_sum(&self.database, None, Some(date)).await
    }

    /// Balance of one account counting rows dated on or before `date`.
    pub async fn account_balance_as_of(
        &self,
        account_id: i64,
        date: NaiveDate,
    ) -> ResultEngine<MoneyCents> {
        self.require_account(&self.database, account_id).await?;
        signed_sum(&self.database, Some(account_id), Some(date)).await
    }

    /// Totals per kind over `[from, to]`.
    pub async fn summary(&self, from: NaiveDate, to: NaiveDate) -> ResultEngine<PeriodSummary> {
        if from > to {
            return Err(EngineError::InvalidField(
                "invalid range: from must be <= to".to_string(),
            ));
        }
        let rows = transactions::Entity::find()
            .filter(transactions::Column::Kind.ne(TransactionKind::BalanceSnapshot.as_str()))
            .filter(transactions::Column::EffectiveDate.between(from, to))
            .all(&self.database)
            .await?;

        let mut summary = PeriodSummary::default();
        for row in rows {
            let amount = MoneyCents::new(row.amount_minor);
            match TransactionKind::try_from(row.kind.as_str())? {
                TransactionKind::Income => summary.income += amount,
                TransactionKind::Expense => summary.expense += amount,
                TransactionKind::Loan => summary.loans += amount,
                TransactionKind::Repayment => summary.repayments += amount,
                TransactionKind::BalanceSnapshot => {}
            }
        }
        summary.net = summary.income + summary.repayments - summary.expense - summary.loans;
        Ok(summary)
    }

    /// Budget against actual spending for every budgeted category of the
    /// month containing `month`.
    pub async fn budget_report(&self, month: NaiveDate) -> ResultEngine<Vec<BudgetLine>> {
        let start = month_start(month)?;
        let end = start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| EngineError::InvalidField(format!("invalid month: {month}")))?;

        let budget_models = budgets::Entity::find()
            .filter(budgets::Column::Month.eq(start))
            .order_by_asc(budgets::Column::CategoryId)
            .all(&self.database)
            .await?;

        let mut lines = Vec::with_capacity(budget_models.len());
        for budget in budget_models {
            let category = categories::Entity::find_by_id(budget.category_id)
                .one(&self.database)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("category not exists".to_string()))?;
            let spent: MoneyCents = transactions::Entity::find()
                .filter(transactions::Column::Kind.eq(TransactionKind::Expense.as_str()))
                .filter(transactions::Column::CategoryId.eq(budget.category_id))
                .filter(transactions::Column::EffectiveDate.gte(start))
                .filter(transactions::Column::EffectiveDate.lt(end))
                .all(&self.database)
                .await?
                .into_iter()
                .map(|row| MoneyCents::new(row.amount_minor))
                .sum();
            let amount = MoneyCents::new(budget.amount_minor);
            lines.push(BudgetLine {
                category_id: budget.category_id,
                category: category.name,
                month: start,
                budget: amount,
                spent,
                remaining: amount - spent,
            });
        }
        Ok(lines)
    }

    /// Rebuild every cached balance, snapshot and loan status from the raw rows.
    pub async fn recompute_all(&self, session: &Session) -> ResultEngine<Vec<i64>> {
        let pending = self.begin_mutation().await?;
        let changed = with_tx!(self, |db_tx| {
            let impact = Impact::everything(&db_tx).await?;
            self.cascade(&db_tx, &impact).await
        })?;
        pending.keep();
        info!(user = %session.user, changed = changed.len(), "recomputed all derived values");
        Ok(changed.into_iter().collect())
    }
}
