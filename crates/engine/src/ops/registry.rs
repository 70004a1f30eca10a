use chrono::NaiveDate;
use sea_orm::{
    ActiveValue, ConnectionTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use tracing::{info, warn};

use crate::{
    Account, Budget, Category, CategoryKind, CurrencyCode, EngineError, MoneyCents,
    ResultEngine, Session, accounts, budgets,
    budgets::month_start,
    categories, transactions,
    util::{normalize_optional_text, normalize_required_name, validate_description},
};

use super::{Engine, with_tx};

impl Engine {
    pub(crate) async fn require_account<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i64,
    ) -> ResultEngine<accounts::Model> {
        accounts::Entity::find_by_id(account_id)
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("account {account_id}")))
    }

    pub(crate) async fn require_category<C: ConnectionTrait>(
        &self,
        db: &C,
        category_id: i64,
    ) -> ResultEngine<categories::Model> {
        categories::Entity::find_by_id(category_id)
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("category {category_id}")))
    }

    async fn ensure_account_name_free<C: ConnectionTrait>(
        db: &C,
        name: &str,
        except: Option<i64>,
    ) -> ResultEngine<()> {
        let mut query = accounts::Entity::find()
            .filter(Expr::cust("LOWER(name)").eq(name.to_lowercase()));
        if let Some(id) = except {
            query = query.filter(accounts::Column::Id.ne(id));
        }
        if query.one(db).await?.is_some() {
            return Err(EngineError::ExistingKey(name.to_string()));
        }
        Ok(())
    }

    async fn ensure_category_name_free<C: ConnectionTrait>(
        db: &C,
        name: &str,
        kind: CategoryKind,
        except: Option<i64>,
    ) -> ResultEngine<()> {
        let mut query = categories::Entity::find()
            .filter(categories::Column::Kind.eq(kind.as_str()))
            .filter(Expr::cust("LOWER(name)").eq(name.to_lowercase()));
        if let Some(id) = except {
            query = query.filter(categories::Column::Id.ne(id));
        }
        if query.one(db).await?.is_some() {
            return Err(EngineError::ExistingKey(name.to_string()));
        }
        Ok(())
    }

    /// Add a new account with a zero balance.
    ///
    /// `currency` defaults to `EUR`.
    pub async fn create_account(
        &self,
        session: &Session,
        name: &str,
        currency: Option<&str>,
        description: Option<&str>,
    ) -> ResultEngine<i64> {
        let name = normalize_required_name(name, "account")?;
        let currency = currency
            .map(CurrencyCode::try_from)
            .transpose()?
            .unwrap_or_default();
        let description = normalize_optional_text(description);
        if let Some(description) = &description {
            validate_description(description)?;
        }

        let pending = self.begin_mutation().await?;
        let id = with_tx!(self, |db_tx| {
            Self::ensure_account_name_free(&db_tx, &name, None).await?;
            let model = accounts::ActiveModel {
                id: ActiveValue::NotSet,
                name: ActiveValue::Set(name.clone()),
                currency: ActiveValue::Set(currency.code().to_string()),
                balance: ActiveValue::Set(0),
                description: ActiveValue::Set(description),
            }
            .insert(&db_tx)
            .await?;
            Ok::<_, EngineError>(model.id)
        })?;
        pending.keep();
        info!(user = %session.user, account_id = id, %name, "account created");
        Ok(id)
    }

    /// Rename an account, change its currency label or its description.
    ///
    /// `description: Some("")` clears the description.
    pub async fn update_account(
        &self,
        session: &Session,
        account_id: i64,
        name: Option<&str>,
        currency: Option<&str>,
        description: Option<&str>,
    ) -> ResultEngine<Account> {
        let name = name
            .map(|n| normalize_required_name(n, "account"))
            .transpose()?;
        let currency = currency.map(CurrencyCode::try_from).transpose()?;
        let description = description.map(|d| normalize_optional_text(Some(d)));
        if let Some(Some(description)) = &description {
            validate_description(description)?;
        }

        let pending = self.begin_mutation().await?;
        let account = with_tx!(self, |db_tx| {
            self.require_account(&db_tx, account_id).await?;
            if let Some(name) = &name {
                Self::ensure_account_name_free(&db_tx, name, Some(account_id)).await?;
            }
            let mut active = accounts::ActiveModel {
                id: ActiveValue::Set(account_id),
                ..Default::default()
            };
            if let Some(name) = name {
                active.name = ActiveValue::Set(name);
            }
            if let Some(currency) = currency {
                active.currency = ActiveValue::Set(currency.code().to_string());
            }
            if let Some(description) = description {
                active.description = ActiveValue::Set(description);
            }
            let model = active.update(&db_tx).await?;
            Account::try_from(model)
        })?;
        pending.keep();
        info!(user = %session.user, account_id, "account updated");
        Ok(account)
    }

    /// Delete an account no transaction references.
    pub async fn delete_account(&self, session: &Session, account_id: i64) -> ResultEngine<()> {
        let pending = self.begin_mutation().await?;
        with_tx!(self, |db_tx| {
            self.require_account(&db_tx, account_id).await?;
            let used = transactions::Entity::find()
                .filter(transactions::Column::AccountId.eq(account_id))
                .count(&db_tx)
                .await?;
            if used > 0 {
                warn!(account_id, used, "account still referenced");
                return Err(EngineError::InUse(format!(
                    "account {account_id} has {used} transactions"
                )));
            }
            accounts::Entity::delete_by_id(account_id)
                .exec(&db_tx)
                .await?;
            Ok::<_, EngineError>(())
        })?;
        pending.keep();
        info!(user = %session.user, account_id, "account deleted");
        Ok(())
    }

    /// Every account, ordered by name.
    pub async fn accounts(&self) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .order_by_asc(accounts::Column::Name)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    pub async fn create_category(
        &self,
        session: &Session,
        name: &str,
        kind: CategoryKind,
    ) -> ResultEngine<i64> {
        let name = normalize_required_name(name, "category")?;

        let pending = self.begin_mutation().await?;
        let id = with_tx!(self, |db_tx| {
            Self::ensure_category_name_free(&db_tx, &name, kind, None).await?;
            let model = categories::ActiveModel {
                id: ActiveValue::NotSet,
                name: ActiveValue::Set(name.clone()),
                kind: ActiveValue::Set(kind.as_str().to_string()),
            }
            .insert(&db_tx)
            .await?;
            Ok::<_, EngineError>(model.id)
        })?;
        pending.keep();
        info!(user = %session.user, category_id = id, %name, "category created");
        Ok(id)
    }

    pub async fn rename_category(
        &self,
        session: &Session,
        category_id: i64,
        name: &str,
    ) -> ResultEngine<Category> {
        let name = normalize_required_name(name, "category")?;

        let pending = self.begin_mutation().await?;
        let category = with_tx!(self, |db_tx| {
            let model = self.require_category(&db_tx, category_id).await?;
            let kind = CategoryKind::try_from(model.kind.as_str())?;
            Self::ensure_category_name_free(&db_tx, &name, kind, Some(category_id)).await?;
            let model = categories::ActiveModel {
                id: ActiveValue::Set(category_id),
                name: ActiveValue::Set(name.clone()),
                ..Default::default()
            }
            .update(&db_tx)
            .await?;
            Category::try_from(model)
        })?;
        pending.keep();
        info!(user = %session.user, category_id, %name, "category renamed");
        Ok(category)
    }

    /// Delete a category no transaction references, with its budgets.
    pub async fn delete_category(&self, session: &Session, category_id: i64) -> ResultEngine<()> {
        let pending = self.begin_mutation().await?;
        with_tx!(self, |db_tx| {
            self.require_category(&db_tx, category_id).await?;
            let used = transactions::Entity::find()
                .filter(transactions::Column::CategoryId.eq(category_id))
                .count(&db_tx)
                .await?;
            if used > 0 {
                warn!(category_id, used, "category still referenced");
                return Err(EngineError::InUse(format!(
                    "category {category_id} has {used} transactions"
                )));
            }
            budgets::Entity::delete_many()
                .filter(budgets::Column::CategoryId.eq(category_id))
                .exec(&db_tx)
                .await?;
            categories::Entity::delete_by_id(category_id)
                .exec(&db_tx)
                .await?;
            Ok::<_, EngineError>(())
        })?;
        pending.keep();
        info!(user = %session.user, category_id, "category deleted");
        Ok(())
    }

    /// Categories, optionally of one kind, ordered by kind then name.
    pub async fn categories(&self, kind: Option<CategoryKind>) -> ResultEngine<Vec<Category>> {
        let mut query = categories::Entity::find();
        if let Some(kind) = kind {
            query = query.filter(categories::Column::Kind.eq(kind.as_str()));
        }
        query
            .order_by_asc(categories::Column::Kind)
            .order_by_asc(categories::Column::Name)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Category::try_from)
            .collect()
    }

    /// Set the budget of a category for the month containing `month`.
    pub async fn set_budget(
        &self,
        session: &Session,
        category_id: i64,
        month: NaiveDate,
        amount: MoneyCents,
    ) -> ResultEngine<Budget> {
        if amount.is_negative() {
            return Err(EngineError::InvalidAmount(format!(
                "budget must be >= 0, got {amount}"
            )));
        }
        let month = month_start(month)?;

        let pending = self.begin_mutation().await?;
        let budget = with_tx!(self, |db_tx| {
            self.require_category(&db_tx, category_id).await?;
            let existing = budgets::Entity::find()
                .filter(budgets::Column::CategoryId.eq(category_id))
                .filter(budgets::Column::Month.eq(month))
                .one(&db_tx)
                .await?;
            let model = match existing {
                Some(model) => {
                    budgets::ActiveModel {
                        id: ActiveValue::Set(model.id),
                        amount_minor: ActiveValue::Set(amount.cents()),
                        ..Default::default()
                    }
                    .update(&db_tx)
                    .await?
                }
                None => {
                    budgets::ActiveModel {
                        id: ActiveValue::NotSet,
                        category_id: ActiveValue::Set(category_id),
                        month: ActiveValue::Set(month),
                        amount_minor: ActiveValue::Set(amount.cents()),
                    }
                    .insert(&db_tx)
                    .await?
                }
            };
            Ok::<_, EngineError>(Budget::from(model))
        })?;
        pending.keep();
        info!(user = %session.user, category_id, %month, %amount, "budget set");
        Ok(budget)
    }

    pub async fn remove_budget(
        &self,
        session: &Session,
        category_id: i64,
        month: NaiveDate,
    ) -> ResultEngine<()> {
        let month = month_start(month)?;

        let pending = self.begin_mutation().await?;
        with_tx!(self, |db_tx| {
            let result = budgets::Entity::delete_many()
                .filter(budgets::Column::CategoryId.eq(category_id))
                .filter(budgets::Column::Month.eq(month))
                .exec(&db_tx)
                .await?;
            if result.rows_affected == 0 {
                return Err(EngineError::KeyNotFound(format!(
                    "budget for category {category_id} in {month}"
                )));
            }
            Ok::<_, EngineError>(())
        })?;
        pending.keep();
        info!(user = %session.user, category_id, %month, "budget removed");
        Ok(())
    }

    /// Budgets, optionally only those of the month containing `month`.
    pub async fn budgets(&self, month: Option<NaiveDate>) -> ResultEngine<Vec<Budget>> {
        let mut query = budgets::Entity::find();
        if let Some(month) = month {
            query = query.filter(budgets::Column::Month.eq(month_start(month)?));
        }
        Ok(query
            .order_by_asc(budgets::Column::Month)
            .order_by_asc(budgets::Column::CategoryId)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::from)
            .collect())
    }
}
