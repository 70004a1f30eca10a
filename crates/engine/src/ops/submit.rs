use sea_orm::{ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use tracing::{debug, info};

use crate::{
    LedgerView, MutationRequest, OverpaymentDecision, ResultEngine, Session, Transaction,
    transactions,
};

use super::{Changes, Engine, Impact, with_tx};

fn request_name(request: &MutationRequest) -> &'static str {
    match request {
        MutationRequest::Add(_) => "add",
        MutationRequest::ResolveOverpayment { .. } => "resolve_overpayment",
        MutationRequest::Edit { .. } => "edit",
        MutationRequest::Delete(_) => "delete",
        MutationRequest::Settle(_) => "settle",
        MutationRequest::AdjustOverpayment(_) => "adjust_overpayment",
        MutationRequest::ExecuteRecurrence(_) => "execute_recurrence",
        MutationRequest::StopRecurrence(_) => "stop_recurrence",
        MutationRequest::TakeSnapshot { .. } => "take_snapshot",
    }
}

impl Engine {
    /// Apply one mutation.
    ///
    /// The store is checkpointed first; the mutation, loan status refresh,
    /// account balance refresh and snapshot cascade then run in a single
    /// database transaction. On error nothing is written and the checkpoint
    /// is dropped.
    ///
    /// `ResolveOverpayment` with [`OverpaymentDecision::Reject`] records
    /// nothing and keeps no checkpoint; neither does a request that changes
    /// no row.
    pub async fn submit(
        &self,
        session: &Session,
        request: MutationRequest,
    ) -> ResultEngine<LedgerView> {
        let name = request_name(&request);
        if let MutationRequest::ResolveOverpayment {
            decision: OverpaymentDecision::Reject,
            ..
        } = request
        {
            info!(user = %session.user, request = name, "overpayment rejected");
            return self.view(Changes::default()).await;
        }

        let pending = self.begin_mutation().await?;
        let changes = with_tx!(self, |db_tx| {
            self.apply_in(&db_tx, session, &request).await
        })?;
        if pending.keep_if(&changes).is_none() {
            debug!(request = name, "nothing changed, checkpoint dropped");
        }

        info!(
            user = %session.user,
            request = name,
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            "mutation committed"
        );
        self.view(changes).await
    }

    async fn apply_in<C: ConnectionTrait>(
        &self,
        db: &C,
        session: &Session,
        request: &MutationRequest,
    ) -> ResultEngine<Changes> {
        let mut impact = Impact::default();
        let mut changes = match request {
            MutationRequest::Add(tx) => self.add_in(db, session, tx, None, &mut impact).await?,
            MutationRequest::ResolveOverpayment { tx, decision } => {
                self.add_in(db, session, tx, Some(*decision), &mut impact)
                    .await?
            }
            MutationRequest::Edit { id, patch } => {
                self.edit_in(db, session, *id, patch, &mut impact).await?
            }
            MutationRequest::Delete(ids) => self.delete_in(db, ids, &mut impact).await?,
            MutationRequest::Settle(loan_id) => self.settle_in(db, *loan_id).await?,
            MutationRequest::AdjustOverpayment(id) => {
                self.adjust_overpayment_in(db, *id, &mut impact).await?
            }
            MutationRequest::ExecuteRecurrence(id) => {
                self.execute_recurrence_in(db, session, *id, &mut impact)
                    .await?
            }
            MutationRequest::StopRecurrence(id) => self.stop_recurrence_in(db, *id).await?,
            MutationRequest::TakeSnapshot {
                account_id,
                date,
                description,
            } => {
                self.snapshot_in(db, session, *account_id, *date, description)
                    .await?
            }
        };

        let derived = self.cascade(db, &impact).await?;
        debug!(?derived, "derived rows refreshed");
        changes.merge(Changes {
            changed: derived,
            removed: Default::default(),
        });
        Ok(changes)
    }

    /// Build the view returned to the caller after a mutation.
    async fn view(&self, changes: Changes) -> ResultEngine<LedgerView> {
        let changed = if changes.changed.is_empty() {
            Vec::new()
        } else {
            transactions::Entity::find()
                .filter(transactions::Column::Id.is_in(changes.changed.iter().copied()))
                .order_by_asc(transactions::Column::Id)
                .all(&self.database)
                .await?
                .into_iter()
                .map(Transaction::try_from)
                .collect::<ResultEngine<Vec<_>>>()?
        };
        let balances = self.balances().await?;
        let total = balances.iter().map(|a| a.balance).sum();
        Ok(LedgerView {
            changed,
            removed: changes.removed.into_iter().collect(),
            balances,
            total,
        })
    }
}
