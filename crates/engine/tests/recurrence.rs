mod common;

use common::{Ledger, cents, date};
use engine::{EngineError, Frequency, MutationRequest, Recurrence, Session, TransactionPatch};

#[tokio::test]
async fn monthly_template_clamps_to_end_of_february() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .expense(8_000, date(2024, 1, 31))
                .description("Rent")
                .recurrence(Recurrence::new(Frequency::Monthly)),
        )
        .await;

    let view = ledger
        .submit(MutationRequest::ExecuteRecurrence(template))
        .await;

    let occurrence = view.changed.iter().find(|tx| tx.id != template).unwrap();
    assert_eq!(occurrence.effective_date, date(2024, 2, 29));
    assert_eq!(occurrence.amount, cents(8_000));
    assert_eq!(occurrence.description, "Rent");
    assert!(occurrence.recurrence.is_none());

    let moved = ledger.engine.transaction(template).await.unwrap();
    assert_eq!(moved.effective_date, date(2024, 2, 29));
    assert_eq!(moved.recurrence, Some(Recurrence::new(Frequency::Monthly)));
    assert_eq!(ledger.balance().await, cents(-16_000));
}

#[tokio::test]
async fn non_leap_year_lands_on_february_28() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .expense(100, date(2023, 1, 31))
                .recurrence(Recurrence::new(Frequency::Monthly)),
        )
        .await;

    ledger
        .submit(MutationRequest::ExecuteRecurrence(template))
        .await;

    let moved = ledger.engine.transaction(template).await.unwrap();
    assert_eq!(moved.effective_date, date(2023, 2, 28));
}

#[tokio::test]
async fn execution_past_end_date_is_refused() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .income(500, date(2024, 1, 15))
                .recurrence(Recurrence::new(Frequency::Monthly).until(date(2024, 2, 20))),
        )
        .await;

    ledger
        .submit(MutationRequest::ExecuteRecurrence(template))
        .await;
    let err = ledger
        .engine
        .submit(&ledger.session, MutationRequest::ExecuteRecurrence(template))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::RecurrenceExpired {
            id: template,
            next: date(2024, 3, 15),
            end: date(2024, 2, 20),
        }
    );
    assert_eq!(ledger.balance().await, cents(1_000));
}

#[tokio::test]
async fn occurrences_cannot_be_dated_in_the_future() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .expense(100, date(2024, 12, 20))
                .recurrence(Recurrence::new(Frequency::Monthly)),
        )
        .await;

    let err = ledger
        .engine
        .submit(&ledger.session, MutationRequest::ExecuteRecurrence(template))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::FutureDate { .. }));

    let later = Session::new("alice", date(2025, 1, 20));
    ledger
        .engine
        .submit(&later, MutationRequest::ExecuteRecurrence(template))
        .await
        .unwrap();
}

#[tokio::test]
async fn executing_fills_in_a_snapshot_between_old_and_new_dates() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .income(1_000, date(2024, 3, 1))
                .recurrence(Recurrence::new(Frequency::Daily)),
        )
        .await;
    let snapshot = ledger.snapshot(Some(ledger.account), date(2024, 3, 1)).await;
    let later = ledger.snapshot(Some(ledger.account), date(2024, 3, 5)).await;
    assert_eq!(ledger.amount(snapshot).await, cents(1_000));

    ledger
        .submit(MutationRequest::ExecuteRecurrence(template))
        .await;

    // The template itself moved to March 2, together with its occurrence.
    assert_eq!(ledger.amount(snapshot).await, cents(0));
    assert_eq!(ledger.amount(later).await, cents(2_000));
}

#[tokio::test]
async fn stopped_template_no_longer_recurs() {
    let ledger = Ledger::new().await;
    let template = ledger
        .add(
            ledger
                .expense(100, date(2024, 1, 1))
                .recurrence(Recurrence::new(Frequency::Yearly)),
        )
        .await;

    ledger
        .submit(MutationRequest::StopRecurrence(template))
        .await;
    assert!(
        ledger
            .engine
            .transaction(template)
            .await
            .unwrap()
            .recurrence
            .is_none()
    );

    for request in [
        MutationRequest::ExecuteRecurrence(template),
        MutationRequest::StopRecurrence(template),
    ] {
        let err = ledger
            .engine
            .submit(&ledger.session, request)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidField(_)));
    }
}

#[tokio::test]
async fn end_date_before_start_is_rejected() {
    let ledger = Ledger::new().await;
    let err = ledger
        .engine
        .submit(
            &ledger.session,
            MutationRequest::Add(
                ledger
                    .expense(100, date(2024, 5, 1))
                    .recurrence(Recurrence::new(Frequency::Monthly).until(date(2024, 4, 1))),
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));
}

#[tokio::test]
async fn due_recurrences_lists_templates_ready_to_fire() {
    let ledger = Ledger::new().await;
    let due = ledger
        .add(
            ledger
                .expense(100, date(2024, 11, 30))
                .recurrence(Recurrence::new(Frequency::Monthly)),
        )
        .await;
    let not_yet = ledger
        .add(
            ledger
                .expense(100, date(2024, 12, 15))
                .recurrence(Recurrence::new(Frequency::Monthly)),
        )
        .await;
    let expired = ledger
        .add(
            ledger
                .expense(100, date(2024, 10, 1))
                .recurrence(Recurrence::new(Frequency::Monthly).until(date(2024, 10, 20))),
        )
        .await;
    ledger.add(ledger.expense(100, date(2024, 1, 1))).await;

    let found = ledger
        .engine
        .due_recurrences(date(2024, 12, 31))
        .await
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|(tx, _)| tx.id).collect();
    assert_eq!(ids, vec![due]);
    assert_eq!(found[0].1, date(2024, 12, 30));
    assert!(!ids.contains(&not_yet));
    assert!(!ids.contains(&expired));
}

#[tokio::test]
async fn recurrence_can_be_added_and_cleared_by_edit() {
    let ledger = Ledger::new().await;
    let id = ledger.add(ledger.expense(100, date(2024, 6, 1))).await;

    ledger
        .submit(MutationRequest::Edit {
            id,
            patch: TransactionPatch::new().recurrence(Some(Recurrence::new(Frequency::Weekly))),
        })
        .await;
    let tx = ledger.engine.transaction(id).await.unwrap();
    assert_eq!(tx.recurrence.map(|r| r.frequency), Some(Frequency::Weekly));

    ledger
        .submit(MutationRequest::Edit {
            id,
            patch: TransactionPatch::new().recurrence(None),
        })
        .await;
    assert!(ledger.engine.transaction(id).await.unwrap().recurrence.is_none());
}
