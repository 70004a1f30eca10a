use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, prelude::*};
use tracing::warn;

use crate::{
    EngineError, LoanStatus, NewTransaction, OverpaymentDecision, Recurrence, ResultEngine,
    Session, Transaction, TransactionFilter, TransactionKind, TransactionPatch, categories,
    transactions,
    util::{validate_description, validate_not_future, validate_positive},
};

use super::{Changes, Engine, Impact, loans::refund_for};

fn validate_recurrence(
    recurrence: Option<&Recurrence>,
    kind: TransactionKind,
    date: NaiveDate,
) -> ResultEngine<()> {
    let Some(recurrence) = recurrence else {
        return Ok(());
    };
    if kind == TransactionKind::BalanceSnapshot {
        return Err(EngineError::InvalidField(
            "balance snapshots cannot recur".to_string(),
        ));
    }
    if let Some(end) = recurrence.end_date
        && end < date
    {
        return Err(EngineError::InvalidField(format!(
            "recurrence ends on {end}, before {date}"
        )));
    }
    Ok(())
}

/// Checks that need no database access.
fn validate_fields(tx: &NewTransaction, today: NaiveDate) -> ResultEngine<()> {
    if tx.kind == TransactionKind::BalanceSnapshot {
        return Err(EngineError::InvalidField(
            "balance snapshots are taken, not added".to_string(),
        ));
    }
    validate_positive(tx.amount)?;
    validate_description(&tx.description)?;
    validate_not_future(tx.effective_date, today)?;
    validate_recurrence(tx.recurrence.as_ref(), tx.kind, tx.effective_date)?;
    match (tx.kind, tx.related_id) {
        (TransactionKind::Repayment, None) => Err(EngineError::InvalidField(
            "a repayment needs the loan it repays".to_string(),
        )),
        (TransactionKind::Repayment, Some(_)) | (_, None) => Ok(()),
        (kind, Some(_)) => Err(EngineError::InvalidField(format!(
            "only repayments reference a loan, not {}",
            kind.as_str()
        ))),
    }
}

fn matches_text(tx: &Transaction, category: Option<&str>, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    tx.description.to_lowercase().contains(&needle)
        || category.is_some_and(|name| name.to_lowercase().contains(&needle))
        || tx.amount.to_string().contains(&needle)
}

impl Engine {
    pub(crate) async fn require_transaction<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i64,
    ) -> ResultEngine<Transaction> {
        let model = transactions::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("transaction {id}")))?;
        Transaction::try_from(model)
    }

    /// Checks against the registry and the loan a repayment points to.
    async fn validate_references<C: ConnectionTrait>(
        &self,
        db: &C,
        kind: TransactionKind,
        category_id: Option<i64>,
        account_id: Option<i64>,
        related_id: Option<i64>,
    ) -> ResultEngine<()> {
        let category_id = category_id.ok_or_else(|| {
            EngineError::InvalidField(format!("a {} needs a category", kind.as_str()))
        })?;
        self.require_category(db, category_id).await?;

        let account_id = account_id.ok_or_else(|| {
            EngineError::InvalidField(format!("a {} needs an account", kind.as_str()))
        })?;
        self.require_account(db, account_id).await?;

        if let Some(loan_id) = related_id {
            self.require_loan(db, loan_id).await?;
        }
        Ok(())
    }

    /// Insert a validated row. Loans start as pending.
    pub(crate) async fn insert_in<C: ConnectionTrait>(
        &self,
        db: &C,
        tx: &NewTransaction,
    ) -> ResultEngine<Transaction> {
        let status = (tx.kind == TransactionKind::Loan).then_some(LoanStatus::Pending);
        let row = Transaction {
            id: 0,
            kind: tx.kind,
            amount: tx.amount,
            category_id: tx.category_id,
            description: tx.description.trim().to_string(),
            effective_date: tx.effective_date,
            account_id: tx.account_id,
            related_id: tx.related_id,
            status,
            settled_override: false,
            tags: tx.tags.clone(),
            recurrence: tx.recurrence,
            created_at: Utc::now(),
        };
        let mut active = transactions::ActiveModel::from(&row);
        active.id = ActiveValue::NotSet;
        let model = active.insert(db).await?;
        Transaction::try_from(model)
    }

    /// Record a new transaction.
    ///
    /// A repayment that overpays its loan fails with `OverpaymentDetected`
    /// unless `decision` is `Split`.
    pub(crate) async fn add_in<C: ConnectionTrait>(
        &self,
        db: &C,
        session: &Session,
        tx: &NewTransaction,
        decision: Option<OverpaymentDecision>,
        impact: &mut Impact,
    ) -> ResultEngine<Changes> {
        validate_fields(tx, session.today)?;
        self.validate_references(db, tx.kind, tx.category_id, tx.account_id, tx.related_id)
            .await?;

        let mut changes = Changes::default();
        let overpayment = match (tx.kind, tx.related_id) {
            (TransactionKind::Repayment, Some(loan_id)) => {
                self.overpayment_in(db, loan_id, tx.amount, None).await?
            }
            _ => None,
        };

        let Some(over) = overpayment else {
            let row = self.insert_in(db, tx).await?;
            impact.touch(&row);
            changes.changed.insert(row.id);
            return Ok(changes);
        };

        match decision {
            Some(OverpaymentDecision::Split) => {
                if !over.remaining.is_zero() {
                    let mut repayment = tx.clone();
                    repayment.amount = over.remaining;
                    let row = self.insert_in(db, &repayment).await?;
                    impact.touch(&row);
                    changes.changed.insert(row.id);
                }
                let refund = self
                    .insert_in(db, &refund_for(tx, over.loan_id, over.surplus))
                    .await?;
                impact.touch(&refund);
                impact.touch_loan(over.loan_id);
                changes.changed.insert(refund.id);
                Ok(changes)
            }
            Some(OverpaymentDecision::Reject) | None => {
                Err(EngineError::OverpaymentDetected(over))
            }
        }
    }

    /// Apply `patch` to transaction `id`.
    pub(crate) async fn edit_in<C: ConnectionTrait>(
        &self,
        db: &C,
        session: &Session,
        id: i64,
        patch: &TransactionPatch,
        impact: &mut Impact,
    ) -> ResultEngine<Changes> {
        let old = self.require_transaction(db, id).await?;
        let mut new = old.clone();

        if let Some(amount) = patch.amount {
            if old.is_snapshot() {
                return Err(EngineError::InvalidField(
                    "a balance snapshot's amount is computed".to_string(),
                ));
            }
            new.amount = amount;
        }
        if let Some(description) = &patch.description {
            new.description = description.trim().to_string();
        }
        if let Some(date) = patch.effective_date {
            new.effective_date = date;
        }
        if let Some(account_id) = patch.account_id {
            new.account_id = Some(account_id);
        }
        if let Some(category_id) = patch.category_id {
            new.category_id = Some(category_id);
        }
        if let Some(loan_id) = patch.related_id {
            if old.kind != TransactionKind::Repayment {
                return Err(EngineError::InvalidField(format!(
                    "only repayments reference a loan, not {}",
                    old.kind.as_str()
                )));
            }
            new.related_id = Some(loan_id);
        }
        if let Some(tags) = &patch.tags {
            new.tags = tags.clone();
        }
        if let Some(recurrence) = patch.recurrence {
            new.recurrence = recurrence;
        }

        if !new.is_snapshot() {
            validate_positive(new.amount)?;
        }
        validate_description(&new.description)?;
        validate_not_future(new.effective_date, session.today)?;
        validate_recurrence(new.recurrence.as_ref(), new.kind, new.effective_date)?;

        if new.is_snapshot() {
            if patch.category_id.is_some() {
                return Err(EngineError::InvalidField(
                    "balance snapshots have no category".to_string(),
                ));
            }
            if let Some(account_id) = new.account_id {
                self.require_account(db, account_id).await?;
            }
        } else {
            self.validate_references(db, new.kind, new.category_id, new.account_id, new.related_id)
                .await?;
        }

        if new.kind == TransactionKind::Repayment
            && (patch.amount.is_some() || patch.related_id.is_some())
            && let Some(loan_id) = new.related_id
            && let Some(over) = self.overpayment_in(db, loan_id, new.amount, Some(id)).await?
        {
            return Err(EngineError::OverpaymentDetected(over));
        }

        transactions::ActiveModel {
            id: ActiveValue::Set(id),
            amount_minor: ActiveValue::Set(new.amount.cents()),
            category_id: ActiveValue::Set(new.category_id),
            description: ActiveValue::Set(new.description.clone()),
            effective_date: ActiveValue::Set(new.effective_date),
            account_id: ActiveValue::Set(new.account_id),
            related_id: ActiveValue::Set(new.related_id),
            tags: ActiveValue::Set(serde_json::to_string(&new.tags)?),
            recurrence_frequency: ActiveValue::Set(
                new.recurrence.map(|r| r.frequency.as_str().to_string()),
            ),
            recurrence_end: ActiveValue::Set(new.recurrence.and_then(|r| r.end_date)),
            ..Default::default()
        }
        .update(db)
        .await?;

        impact.touch(&old);
        impact.touch(&new);
        let mut changes = Changes::default();
        changes.changed.insert(id);
        Ok(changes)
    }

    /// Remove transactions. Pending loans block the whole request.
    pub(crate) async fn delete_in<C: ConnectionTrait>(
        &self,
        db: &C,
        ids: &[i64],
        impact: &mut Impact,
    ) -> ResultEngine<Changes> {
        if ids.is_empty() {
            return Err(EngineError::InvalidField("nothing to delete".to_string()));
        }
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            rows.push(self.require_transaction(db, *id).await?);
        }

        let blocked = Self::pending_loans(&rows);
        if !blocked.is_empty() {
            warn!(loans = ?blocked, "refusing to delete pending loans");
            return Err(EngineError::BlockedByPendingLoan(blocked));
        }

        transactions::Entity::delete_many()
            .filter(transactions::Column::Id.is_in(ids.iter().copied()))
            .exec(db)
            .await?;

        let mut changes = Changes::default();
        for row in &rows {
            impact.touch(row);
            changes.removed.insert(row.id);
        }
        Ok(changes)
    }

    /// One transaction by id.
    pub async fn transaction(&self, id: i64) -> ResultEngine<Transaction> {
        self.require_transaction(&self.database, id).await
    }

    /// Transactions matching `filter`, newest first (date, then id, descending).
    pub async fn query(&self, filter: &TransactionFilter) -> ResultEngine<Vec<Transaction>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from > to
        {
            return Err(EngineError::InvalidField(
                "invalid range: from must be <= to".to_string(),
            ));
        }

        let mut query = transactions::Entity::find();
        if let Some(from) = filter.from {
            query = query.filter(transactions::Column::EffectiveDate.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(transactions::Column::EffectiveDate.lte(to));
        }
        if let Some(kind) = filter.kind {
            query = query.filter(transactions::Column::Kind.eq(kind.as_str()));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(transactions::Column::CategoryId.eq(category_id));
        }
        if let Some(account_id) = filter.account_id {
            query = query.filter(transactions::Column::AccountId.eq(account_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(transactions::Column::Status.eq(status.as_str()));
        }

        let rows = query
            .order_by_desc(transactions::Column::EffectiveDate)
            .order_by_desc(transactions::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let Some(needle) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(rows);
        };

        let names: HashMap<i64, String> = categories::Entity::find()
            .all(&self.database)
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();
        Ok(rows
            .into_iter()
            .filter(|tx| {
                let category = tx.category_id.and_then(|id| names.get(&id)).map(String::as_str);
                matches_text(tx, category, needle)
                    || self
                        .text_matcher
                        .as_ref()
                        .is_some_and(|m| m.matches(tx, category, needle))
            })
            .collect())
    }
}
