mod common;

use std::{fs, time::Duration};

use common::{Ledger, cents, date, database, session};
use engine::{
    Engine, EngineError, LoanStatus, MutationRequest, TransactionFilter, TransactionPatch, seal,
};

#[tokio::test]
async fn undo_restores_the_exact_previous_state() {
    let ledger = Ledger::new().await;
    let loan = ledger.add(ledger.loan(1_000, date(2024, 1, 1))).await;
    ledger
        .add(ledger.repayment(loan, 400, date(2024, 1, 10)))
        .await;
    let snapshot = ledger.snapshot(Some(ledger.account), date(2024, 1, 31)).await;

    let rows = ledger.engine.query(&TransactionFilter::new()).await.unwrap();
    let balances = ledger.engine.balances().await.unwrap();

    ledger.engine.checkpoint().await.unwrap();
    ledger
        .add(ledger.repayment(loan, 600, date(2024, 1, 5)))
        .await;
    assert_eq!(
        ledger.engine.transaction(loan).await.unwrap().status,
        Some(LoanStatus::Settled)
    );
    assert_eq!(ledger.amount(snapshot).await, cents(0));

    ledger.engine.undo(&ledger.session).await.unwrap();

    assert_eq!(
        ledger.engine.query(&TransactionFilter::new()).await.unwrap(),
        rows
    );
    assert_eq!(ledger.engine.balances().await.unwrap(), balances);
    assert_eq!(
        ledger.engine.transaction(loan).await.unwrap().status,
        Some(LoanStatus::Pending)
    );
}

#[tokio::test]
async fn undo_walks_back_one_mutation_at_a_time() {
    let ledger = Ledger::new().await;
    let first = ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    let second = ledger.add(ledger.income(200, date(2024, 1, 2))).await;

    ledger.engine.undo(&ledger.session).await.unwrap();
    assert!(ledger.engine.transaction(second).await.is_err());
    assert!(ledger.engine.transaction(first).await.is_ok());
    assert_eq!(ledger.balance().await, cents(100));

    ledger.engine.undo(&ledger.session).await.unwrap();
    assert!(ledger.engine.transaction(first).await.is_err());
    assert_eq!(ledger.balance().await, cents(0));
}

#[tokio::test]
async fn ids_are_not_reused_after_undo() {
    let ledger = Ledger::new().await;
    let first = ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    ledger.engine.undo(&ledger.session).await.unwrap();

    let again = ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    assert!(again > first);
}

#[tokio::test]
async fn empty_history_has_nothing_to_undo() {
    let engine = Engine::builder()
        .database(database().await)
        .build()
        .await
        .unwrap();
    let err = engine.undo(&session()).await.unwrap_err();
    assert_eq!(err, EngineError::NothingToUndo);
}

#[tokio::test]
async fn history_keeps_the_ten_newest_checkpoints() {
    let ledger = Ledger::new().await;
    let mut taken = Vec::new();
    for _ in 0..11 {
        taken.push(ledger.engine.checkpoint().await.unwrap());
    }

    let kept = ledger.engine.checkpoints().await;
    assert_eq!(kept.len(), 10);
    assert_eq!(kept, taken[1..].to_vec());
}

#[tokio::test]
async fn failed_mutation_leaves_no_checkpoint() {
    let ledger = Ledger::new().await;
    let before = ledger.engine.checkpoints().await;

    let err = ledger
        .engine
        .submit(
            &ledger.session,
            MutationRequest::Add(ledger.income(0, date(2024, 1, 1))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
    assert_eq!(ledger.engine.checkpoints().await, before);
}

#[tokio::test]
async fn failed_mutation_keeps_a_full_history_intact() {
    let ledger = Ledger::new().await;
    for _ in 0..10 {
        ledger.engine.checkpoint().await.unwrap();
    }
    let before = ledger.engine.checkpoints().await;
    assert_eq!(before.len(), 10);

    let err = ledger
        .engine
        .submit(
            &ledger.session,
            MutationRequest::Add(ledger.income(0, date(2024, 1, 1))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
    assert_eq!(ledger.engine.checkpoints().await, before);

    let err = ledger
        .engine
        .create_account(&ledger.session, "checking", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExistingKey(_)));
    assert_eq!(ledger.engine.checkpoints().await, before);

    // A committed mutation then evicts the oldest.
    ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    let after = ledger.engine.checkpoints().await;
    assert_eq!(after.len(), 10);
    assert_eq!(after[..9], before[1..]);
}

#[tokio::test]
async fn unknown_edit_leaves_no_checkpoint() {
    let ledger = Ledger::new().await;
    let before = ledger.engine.checkpoints().await;

    let err = ledger
        .engine
        .submit(
            &ledger.session,
            MutationRequest::Edit {
                id: 12_345,
                patch: TransactionPatch::new().amount(cents(1)),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
    assert_eq!(ledger.engine.checkpoints().await, before);
}

#[tokio::test]
async fn registry_changes_are_undoable() {
    let ledger = Ledger::new().await;
    let savings = ledger
        .engine
        .create_account(&ledger.session, "Savings", None, None)
        .await
        .unwrap();

    ledger.engine.undo(&ledger.session).await.unwrap();
    assert!(
        ledger
            .engine
            .accounts()
            .await
            .unwrap()
            .iter()
            .all(|a| a.id != savings)
    );
}

#[tokio::test]
async fn purge_drops_old_checkpoints() {
    let ledger = Ledger::new().await;
    ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    let count = ledger.engine.checkpoints().await.len();
    assert!(count > 0);

    assert_eq!(
        ledger
            .engine
            .purge_older_than(Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let removed = ledger
        .engine
        .purge_older_than(Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(removed, count);
    assert!(ledger.engine.checkpoints().await.is_empty());
}

#[tokio::test]
async fn directory_history_survives_a_new_engine() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::with(|builder| builder.checkpoint_dir(dir.path())).await;
    let income = ledger.add(ledger.income(100, date(2024, 1, 1))).await;

    let files = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, ledger.engine.checkpoints().await.len());

    let reopened = Engine::builder()
        .database(ledger.db.clone())
        .checkpoint_dir(dir.path())
        .build()
        .await
        .unwrap();
    assert_eq!(
        reopened.checkpoints().await,
        ledger.engine.checkpoints().await
    );

    reopened.undo(&ledger.session).await.unwrap();
    assert!(reopened.transaction(income).await.is_err());
}

#[tokio::test]
async fn sealed_checkpoints_are_encrypted_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::with(|builder| {
        builder
            .checkpoint_dir(dir.path())
            .password("correct horse")
    })
    .await;
    assert!(ledger.engine.is_sealed());
    let income = ledger
        .add(
            ledger
                .income(100, date(2024, 1, 1))
                .description("secret bonus"),
        )
        .await;

    for entry in fs::read_dir(dir.path()).unwrap() {
        let bytes = fs::read(entry.unwrap().path()).unwrap();
        assert!(seal::is_sealed(&bytes));
        assert!(!String::from_utf8_lossy(&bytes).contains("Checking"));
    }

    ledger.engine.undo(&ledger.session).await.unwrap();
    assert!(ledger.engine.transaction(income).await.is_err());
}

#[tokio::test]
async fn tampered_checkpoint_fails_closed_and_stays_on_history() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::with(|builder| {
        builder
            .checkpoint_dir(dir.path())
            .password("correct horse")
    })
    .await;
    let income = ledger.add(ledger.income(100, date(2024, 1, 1))).await;
    let count = ledger.engine.checkpoints().await.len();

    let newest = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .max()
        .unwrap();
    let mut bytes = fs::read(&newest).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&newest, bytes).unwrap();

    let err = ledger.engine.undo(&ledger.session).await.unwrap_err();
    assert_eq!(err, EngineError::AuthenticationFailed);
    assert_eq!(ledger.engine.checkpoints().await.len(), count);
    assert!(ledger.engine.transaction(income).await.is_ok());
}
