use chrono::NaiveDate;
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, prelude::*};

use crate::{
    EngineError, NewTransaction, ResultEngine, Session, Transaction, TransactionKind,
    transactions, util::validate_not_future,
};

use super::{Changes, Engine, Impact};

impl Engine {
    /// Emit the next occurrence of a recurring template and move the template
    /// to that date.
    pub(crate) async fn execute_recurrence_in<C: ConnectionTrait>(
        &self,
        db: &C,
        session: &Session,
        template_id: i64,
        impact: &mut Impact,
    ) -> ResultEngine<Changes> {
        let template = self.require_transaction(db, template_id).await?;
        let recurrence = template.recurrence.ok_or_else(|| {
            EngineError::InvalidField(format!("transaction {template_id} does not recur"))
        })?;

        let next = recurrence.frequency.next(template.effective_date)?;
        if let Some(end) = recurrence.end_date
            && next > end
        {
            return Err(EngineError::RecurrenceExpired {
                id: template_id,
                next,
                end,
            });
        }
        validate_not_future(next, session.today)?;

        if template.kind == TransactionKind::Repayment
            && let Some(loan_id) = template.related_id
            && let Some(over) = self
                .overpayment_in(db, loan_id, template.amount, None)
                .await?
        {
            return Err(EngineError::OverpaymentDetected(over));
        }

        let occurrence = NewTransaction {
            kind: template.kind,
            amount: template.amount,
            category_id: template.category_id,
            description: template.description.clone(),
            effective_date: next,
            account_id: template.account_id,
            related_id: template.related_id,
            tags: template.tags.clone(),
            recurrence: None,
        };
        let row = self.insert_in(db, &occurrence).await?;

        transactions::ActiveModel {
            id: ActiveValue::Set(template_id),
            effective_date: ActiveValue::Set(next),
            ..Default::default()
        }
        .update(db)
        .await?;

        let mut moved = template.clone();
        moved.effective_date = next;
        impact.touch(&template);
        impact.touch(&moved);
        impact.touch(&row);

        let mut changes = Changes::default();
        changes.changed.insert(row.id);
        changes.changed.insert(template_id);
        Ok(changes)
    }

    /// Retire a template: it stays as a plain transaction.
    pub(crate) async fn stop_recurrence_in<C: ConnectionTrait>(
        &self,
        db: &C,
        template_id: i64,
    ) -> ResultEngine<Changes> {
        let template = self.require_transaction(db, template_id).await?;
        if template.recurrence.is_none() {
            return Err(EngineError::InvalidField(format!(
                "transaction {template_id} does not recur"
            )));
        }
        transactions::ActiveModel {
            id: ActiveValue::Set(template_id),
            recurrence_frequency: ActiveValue::Set(None),
            recurrence_end: ActiveValue::Set(None),
            ..Default::default()
        }
        .update(db)
        .await?;

        let mut changes = Changes::default();
        changes.changed.insert(template_id);
        Ok(changes)
    }

    /// Templates whose next occurrence falls on or before `today` and within
    /// their end date, paired with that next date.
    pub async fn due_recurrences(
        &self,
        today: NaiveDate,
    ) -> ResultEngine<Vec<(Transaction, NaiveDate)>> {
        let templates = transactions::Entity::find()
            .filter(transactions::Column::RecurrenceFrequency.is_not_null())
            .order_by_asc(transactions::Column::EffectiveDate)
            .order_by_asc(transactions::Column::Id)
            .all(&self.database)
            .await?;

        let mut due = Vec::new();
        for model in templates {
            let template = Transaction::try_from(model)?;
            let Some(recurrence) = template.recurrence else {
                continue;
            };
            if let Some(next) = recurrence.next_within(template.effective_date)?
                && next <= today
            {
                due.push((template, next));
            }
        }
        Ok(due)
    }
}
