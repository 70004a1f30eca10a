mod common;

use common::{Ledger, cents, date};
use engine::{CategoryKind, EngineError, MutationRequest};

#[tokio::test]
async fn default_categories_are_seeded() {
    let ledger = Ledger::new().await;
    let income: Vec<String> = ledger
        .engine
        .categories(Some(CategoryKind::Income))
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(income, vec!["Bonus", "Investment", "Other", "Salary"]);

    let expense = ledger
        .engine
        .categories(Some(CategoryKind::Expense))
        .await
        .unwrap();
    assert_eq!(expense.len(), 5);
    assert_eq!(ledger.engine.categories(None).await.unwrap().len(), 9);
}

#[tokio::test]
async fn account_names_are_unique_ignoring_case() {
    let ledger = Ledger::new().await;
    let err = ledger
        .engine
        .create_account(&ledger.session, "  checking ", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("checking".to_string()));

    let err = ledger
        .engine
        .create_account(&ledger.session, "   ", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));
}

#[tokio::test]
async fn accounts_carry_a_currency_code() {
    let ledger = Ledger::new().await;
    let id = ledger
        .engine
        .create_account(&ledger.session, "Travel", Some("usd"), Some("card"))
        .await
        .unwrap();
    let account = ledger
        .engine
        .accounts()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.id == id)
        .unwrap();
    assert_eq!(account.currency.code(), "USD");
    assert_eq!(account.description.as_deref(), Some("card"));
    assert_eq!(account.balance, cents(0));

    let err = ledger
        .engine
        .create_account(&ledger.session, "Bad", Some("euro"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));

    let checking = ledger
        .engine
        .accounts()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.id == ledger.account)
        .unwrap();
    assert_eq!(checking.currency.code(), "EUR");
}

#[tokio::test]
async fn update_account_renames_and_clears_description() {
    let ledger = Ledger::new().await;
    let id = ledger
        .engine
        .create_account(&ledger.session, "Wallet", None, Some("pocket money"))
        .await
        .unwrap();

    let updated = ledger
        .engine
        .update_account(&ledger.session, id, Some("Cash"), Some("GBP"), Some(""))
        .await
        .unwrap();
    assert_eq!(updated.name, "Cash");
    assert_eq!(updated.currency.code(), "GBP");
    assert_eq!(updated.description, None);

    let err = ledger
        .engine
        .update_account(&ledger.session, id, Some("CHECKING"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExistingKey(_)));
}

#[tokio::test]
async fn referenced_account_cannot_be_deleted() {
    let ledger = Ledger::new().await;
    let income = ledger.add(ledger.income(100, date(2024, 1, 1))).await;

    let err = ledger
        .engine
        .delete_account(&ledger.session, ledger.account)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InUse(_)));

    ledger.submit(MutationRequest::Delete(vec![income])).await;
    ledger
        .engine
        .delete_account(&ledger.session, ledger.account)
        .await
        .unwrap();
    assert!(ledger.engine.accounts().await.unwrap().is_empty());

    let err = ledger
        .engine
        .delete_account(&ledger.session, ledger.account)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}

#[tokio::test]
async fn category_names_are_unique_within_a_kind() {
    let ledger = Ledger::new().await;
    let err = ledger
        .engine
        .create_category(&ledger.session, "salary", CategoryKind::Income)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExistingKey(_)));

    // Same name, other kind.
    let id = ledger
        .engine
        .create_category(&ledger.session, "Salary", CategoryKind::Expense)
        .await
        .unwrap();
    let renamed = ledger
        .engine
        .rename_category(&ledger.session, id, "Payroll")
        .await
        .unwrap();
    assert_eq!(renamed.name, "Payroll");
    assert_eq!(renamed.kind, CategoryKind::Expense);

    let err = ledger
        .engine
        .rename_category(&ledger.session, id, "dining")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExistingKey(_)));
}

#[tokio::test]
async fn deleting_a_category_takes_its_budgets() {
    let ledger = Ledger::new().await;
    let id = ledger
        .engine
        .create_category(&ledger.session, "Garden", CategoryKind::Expense)
        .await
        .unwrap();
    ledger
        .engine
        .set_budget(&ledger.session, id, date(2024, 5, 1), cents(3_000))
        .await
        .unwrap();

    let expense = ledger
        .add(ledger.expense(100, date(2024, 5, 2)).category(id))
        .await;
    let err = ledger
        .engine
        .delete_category(&ledger.session, id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InUse(_)));

    ledger.submit(MutationRequest::Delete(vec![expense])).await;
    ledger
        .engine
        .delete_category(&ledger.session, id)
        .await
        .unwrap();
    assert!(ledger.engine.budgets(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn budgets_are_upserted_per_month() {
    let ledger = Ledger::new().await;
    let first = ledger
        .engine
        .set_budget(&ledger.session, ledger.dining, date(2024, 5, 20), cents(3_000))
        .await
        .unwrap();
    assert_eq!(first.month, date(2024, 5, 1));

    let second = ledger
        .engine
        .set_budget(&ledger.session, ledger.dining, date(2024, 5, 3), cents(4_500))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.amount, cents(4_500));

    ledger
        .engine
        .set_budget(&ledger.session, ledger.dining, date(2024, 6, 1), cents(100))
        .await
        .unwrap();
    assert_eq!(ledger.engine.budgets(None).await.unwrap().len(), 2);
    assert_eq!(
        ledger
            .engine
            .budgets(Some(date(2024, 6, 30)))
            .await
            .unwrap()
            .len(),
        1
    );

    let err = ledger
        .engine
        .set_budget(&ledger.session, ledger.dining, date(2024, 7, 1), cents(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    ledger
        .engine
        .remove_budget(&ledger.session, ledger.dining, date(2024, 6, 15))
        .await
        .unwrap();
    let err = ledger
        .engine
        .remove_budget(&ledger.session, ledger.dining, date(2024, 6, 15))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}
