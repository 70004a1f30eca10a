use std::collections::BTreeSet;

use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
};
use tracing::{debug, info};

use crate::{
    EngineError, LoanStatus, LoanSummary, MoneyCents, NewTransaction, Overpayment, REFUND_TAG,
    ResultEngine, Transaction, TransactionKind, transactions,
};

use super::{Changes, Engine, Impact, with_tx};

/// Description of the income row that takes the surplus of an overpayment.
pub(crate) fn refund_description(loan_id: i64) -> String {
    format!("Refund of overpayment on loan #{loan_id}")
}

/// Income row carrying `surplus`, copied from the repayment it came from.
pub(crate) fn refund_for(
    repayment: &NewTransaction,
    loan_id: i64,
    surplus: MoneyCents,
) -> NewTransaction {
    let mut tags = repayment.tags.clone();
    tags.insert(REFUND_TAG.to_string());
    NewTransaction {
        kind: TransactionKind::Income,
        amount: surplus,
        category_id: repayment.category_id,
        description: refund_description(loan_id),
        effective_date: repayment.effective_date,
        account_id: repayment.account_id,
        related_id: None,
        tags,
        recurrence: None,
    }
}

impl Engine {
    /// Load a loan by id; fails if missing or not a loan.
    pub(crate) async fn require_loan<C: ConnectionTrait>(
        &self,
        db: &C,
        loan_id: i64,
    ) -> ResultEngine<Transaction> {
        let loan = self.require_transaction(db, loan_id).await?;
        if loan.kind != TransactionKind::Loan {
            return Err(EngineError::InvalidField(format!(
                "transaction {loan_id} is not a loan"
            )));
        }
        Ok(loan)
    }

    /// Sum of repayments of `loan_id`, leaving out `excluding` if given.
    pub(crate) async fn repaid_in<C: ConnectionTrait>(
        &self,
        db: &C,
        loan_id: i64,
        excluding: Option<i64>,
    ) -> ResultEngine<MoneyCents> {
        let mut query = transactions::Entity::find()
            .filter(transactions::Column::Kind.eq(TransactionKind::Repayment.as_str()))
            .filter(transactions::Column::RelatedId.eq(loan_id));
        if let Some(id) = excluding {
            query = query.filter(transactions::Column::Id.ne(id));
        }
        Ok(query
            .all(db)
            .await?
            .into_iter()
            .map(|row| MoneyCents::new(row.amount_minor))
            .sum())
    }

    /// `max(0, loan - repaid)`, leaving out the repayment `excluding`.
    pub(crate) async fn remaining_in<C: ConnectionTrait>(
        &self,
        db: &C,
        loan: &Transaction,
        excluding: Option<i64>,
    ) -> ResultEngine<MoneyCents> {
        let repaid = self.repaid_in(db, loan.id, excluding).await?;
        Ok((loan.amount - repaid).non_negative())
    }

    /// Overpayment a repayment of `amount` against `loan_id` would cause.
    pub(crate) async fn overpayment_in<C: ConnectionTrait>(
        &self,
        db: &C,
        loan_id: i64,
        amount: MoneyCents,
        excluding: Option<i64>,
    ) -> ResultEngine<Option<Overpayment>> {
        let loan = self.require_loan(db, loan_id).await?;
        let remaining = self.remaining_in(db, &loan, excluding).await?;
        if amount <= remaining {
            return Ok(None);
        }
        Ok(Some(Overpayment {
            loan_id,
            amount,
            remaining,
            surplus: amount - remaining,
        }))
    }

    /// Recompute a loan's status and persist it only when it changed.
    ///
    /// Settled iff the repayments cover the principal, or the loan was
    /// force-settled. A missing loan (deleted after settlement) is skipped.
    /// Returns whether the stored status changed.
    pub(crate) async fn refresh_status_in<C: ConnectionTrait>(
        &self,
        db: &C,
        loan_id: i64,
    ) -> ResultEngine<bool> {
        let Some(model) = transactions::Entity::find_by_id(loan_id).one(db).await? else {
            return Ok(false);
        };
        let loan = Transaction::try_from(model)?;
        if loan.kind != TransactionKind::Loan {
            return Ok(false);
        }

        let remaining = self.remaining_in(db, &loan, None).await?;
        let status = if loan.settled_override || remaining.is_zero() {
            LoanStatus::Settled
        } else {
            LoanStatus::Pending
        };
        if loan.status == Some(status) {
            return Ok(false);
        }

        debug!(loan_id, status = status.as_str(), "loan status refreshed");
        transactions::ActiveModel {
            id: ActiveValue::Set(loan_id),
            status: ActiveValue::Set(Some(status.as_str().to_string())),
            ..Default::default()
        }
        .update(db)
        .await?;
        Ok(true)
    }

    /// Force a loan to settled, whatever its repayments say.
    pub(crate) async fn settle_in<C: ConnectionTrait>(
        &self,
        db: &C,
        loan_id: i64,
    ) -> ResultEngine<Changes> {
        let loan = self.require_loan(db, loan_id).await?;
        let mut changes = Changes::default();
        if loan.settled_override && loan.status == Some(LoanStatus::Settled) {
            return Ok(changes);
        }
        transactions::ActiveModel {
            id: ActiveValue::Set(loan_id),
            status: ActiveValue::Set(Some(LoanStatus::Settled.as_str().to_string())),
            settled_override: ActiveValue::Set(true),
            ..Default::default()
        }
        .update(db)
        .await?;
        changes.changed.insert(loan_id);
        Ok(changes)
    }

    /// Shrink an over-large repayment to what is left on its loan and book the
    /// difference as a refund income. The repayment is removed when nothing
    /// was left; a repayment that does not overpay is left untouched.
    pub(crate) async fn adjust_overpayment_in<C: ConnectionTrait>(
        &self,
        db: &C,
        repayment_id: i64,
        impact: &mut Impact,
    ) -> ResultEngine<Changes> {
        let repayment = self.require_transaction(db, repayment_id).await?;
        if repayment.kind != TransactionKind::Repayment {
            return Err(EngineError::InvalidField(format!(
                "transaction {repayment_id} is not a repayment"
            )));
        }
        let loan_id = repayment.related_id.ok_or_else(|| {
            EngineError::InvalidField(format!("repayment {repayment_id} has no loan"))
        })?;

        let mut changes = Changes::default();
        let Some(over) = self
            .overpayment_in(db, loan_id, repayment.amount, Some(repayment_id))
            .await?
        else {
            return Ok(changes);
        };

        impact.touch(&repayment);
        if over.remaining.is_zero() {
            transactions::Entity::delete_by_id(repayment_id)
                .exec(db)
                .await?;
            changes.removed.insert(repayment_id);
        } else {
            transactions::ActiveModel {
                id: ActiveValue::Set(repayment_id),
                amount_minor: ActiveValue::Set(over.remaining.cents()),
                ..Default::default()
            }
            .update(db)
            .await?;
            changes.changed.insert(repayment_id);
        }

        let source = NewTransaction {
            kind: repayment.kind,
            amount: repayment.amount,
            category_id: repayment.category_id,
            description: repayment.description.clone(),
            effective_date: repayment.effective_date,
            account_id: repayment.account_id,
            related_id: repayment.related_id,
            tags: repayment.tags.clone(),
            recurrence: None,
        };
        let refund = self
            .insert_in(db, &refund_for(&source, loan_id, over.surplus))
            .await?;
        impact.touch(&refund);
        changes.changed.insert(refund.id);
        Ok(changes)
    }

    /// Report whether recording `tx` would overpay its loan.
    ///
    /// Returns `None` for anything that is not a repayment.
    pub async fn detect_overpayment(
        &self,
        tx: &NewTransaction,
    ) -> ResultEngine<Option<Overpayment>> {
        match (tx.kind, tx.related_id) {
            (TransactionKind::Repayment, Some(loan_id)) => {
                self.overpayment_in(&self.database, loan_id, tx.amount, None)
                    .await
            }
            _ => Ok(None),
        }
    }

    /// What is left to repay on a loan.
    pub async fn remaining(&self, loan_id: i64) -> ResultEngine<MoneyCents> {
        let loan = self.require_loan(&self.database, loan_id).await?;
        self.remaining_in(&self.database, &loan, None).await
    }

    /// Bring a loan's stored status in line with its repayments.
    ///
    /// Returns `true` when the status was rewritten; a second call right
    /// after returns `false`.
    pub async fn refresh_status(&self, loan_id: i64) -> ResultEngine<bool> {
        self.require_loan(&self.database, loan_id).await?;
        let changed = with_tx!(self, |db_tx| {
            self.refresh_status_in(&db_tx, loan_id).await
        })?;
        if changed {
            info!(loan_id, "loan status repaired");
        }
        Ok(changed)
    }

    /// Pending loans with their repayment progress, oldest first.
    pub async fn open_loans(&self) -> ResultEngine<Vec<LoanSummary>> {
        let models = transactions::Entity::find()
            .filter(transactions::Column::Kind.eq(TransactionKind::Loan.as_str()))
            .filter(transactions::Column::Status.eq(LoanStatus::Pending.as_str()))
            .order_by_asc(transactions::Column::EffectiveDate)
            .order_by_asc(transactions::Column::Id)
            .all(&self.database)
            .await?;

        let mut loans = Vec::with_capacity(models.len());
        for model in models {
            let loan = Transaction::try_from(model)?;
            let repaid = self.repaid_in(&self.database, loan.id, None).await?;
            loans.push(LoanSummary {
                remaining: (loan.amount - repaid).non_negative(),
                repaid,
                loan,
            });
        }
        Ok(loans)
    }

    /// Ids of the pending loans in `rows`, ascending.
    pub(crate) fn pending_loans(rows: &[Transaction]) -> Vec<i64> {
        rows.iter()
            .filter(|tx| tx.is_pending_loan())
            .map(|tx| tx.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
