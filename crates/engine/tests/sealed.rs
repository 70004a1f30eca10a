mod common;

use common::{Ledger, cents, date, database, session};
use engine::{Engine, EngineError, TransactionFilter, seal};

#[tokio::test]
async fn export_then_import_into_a_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sealed");

    let ledger = Ledger::with(|builder| builder.password("hunter2")).await;
    let loan = ledger.add(ledger.loan(1_000, date(2024, 1, 1))).await;
    ledger
        .add(ledger.repayment(loan, 250, date(2024, 1, 2)))
        .await;
    ledger.engine.export_sealed(&path).await.unwrap();
    assert!(seal::is_sealed(&std::fs::read(&path).unwrap()));

    let fresh = Engine::builder()
        .database(database().await)
        .build()
        .await
        .unwrap();
    fresh
        .import_sealed(&session(), &path, "hunter2")
        .await
        .unwrap();

    assert_eq!(
        fresh.query(&TransactionFilter::new()).await.unwrap(),
        ledger.engine.query(&TransactionFilter::new()).await.unwrap()
    );
    assert_eq!(fresh.total_balance().await.unwrap(), cents(-750));
    assert_eq!(fresh.remaining(loan).await.unwrap(), cents(750));

    // The store it replaced is one undo away.
    fresh.undo(&session()).await.unwrap();
    assert!(fresh.query(&TransactionFilter::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_password_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sealed");

    let ledger = Ledger::with(|builder| builder.password("hunter2")).await;
    ledger.add(ledger.income(500, date(2024, 1, 1))).await;
    ledger.engine.export_sealed(&path).await.unwrap();

    let other = Ledger::new().await;
    let before = other.engine.checkpoints().await;
    let err = other
        .engine
        .import_sealed(&other.session, &path, "hunter3")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AuthenticationFailed);
    assert_eq!(other.engine.checkpoints().await, before);
    assert_eq!(other.engine.accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn open_sealed_loads_without_a_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sealed");

    let ledger = Ledger::with(|builder| builder.password("hunter2")).await;
    let income = ledger.add(ledger.income(500, date(2024, 1, 1))).await;
    ledger.engine.export_sealed(&path).await.unwrap();

    let reopened = Engine::builder()
        .database(database().await)
        .password("hunter2")
        .build()
        .await
        .unwrap();
    reopened.open_sealed(&path).await.unwrap();

    assert!(reopened.checkpoints().await.is_empty());
    assert_eq!(
        reopened.transaction(income).await.unwrap().amount,
        cents(500)
    );
}

#[tokio::test]
async fn export_needs_a_password() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::new().await;
    let err = ledger
        .engine
        .export_sealed(&dir.path().join("ledger.sealed"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));
}

#[tokio::test]
async fn empty_password_is_refused() {
    let err = Engine::builder()
        .database(database().await)
        .password("")
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));
}
