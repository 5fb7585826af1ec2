mod support;

use chrono::Duration as ChronoDuration;
use support::{epoch, Harness};
use vending_core::store::{AccountMutation, AccountStore, Precondition, UpdateOutcome};
use vending_core::{Account, AccountStatus, Error, TimestampField};

fn mutation_from(expected: AccountStatus) -> AccountMutation {
    AccountStatus::ALL
        .into_iter()
        .find(|next| expected.can_transition_to(*next))
        .map(AccountMutation::transition)
        .unwrap_or_else(|| AccountMutation::annotate().with_error_message("note"))
}

#[tokio::test]
async fn mismatched_expected_status_never_mutates() {
    for actual in AccountStatus::ALL {
        for expected in AccountStatus::ALL.into_iter().filter(|s| *s != actual) {
            let original = Account::new("ovm-x", "x@example.com", actual).with_account_id("1");
            let harness = Harness::new([original.clone()]);

            let outcome = harness
                .store
                .conditional_update(
                    "ovm-x",
                    &Precondition::status(expected),
                    &mutation_from(expected).with_timestamp(TimestampField::VendingDate, epoch()),
                )
                .await
                .expect("conditional update should run");

            assert_eq!(
                outcome,
                UpdateOutcome::PreconditionFailed,
                "{actual} guarded on {expected}"
            );
            assert_eq!(harness.record("ovm-x").await, original);
            assert!(harness
                .store
                .drain_notifications()
                .expect("drain")
                .is_empty());
        }
    }
}

#[tokio::test]
async fn off_graph_and_unguarded_status_writes_are_rejected() {
    let harness = Harness::new([Account::new("ovm-x", "x@example.com", AccountStatus::Created)]);

    let error = harness
        .store
        .conditional_update(
            "ovm-x",
            &Precondition::status(AccountStatus::Created),
            &AccountMutation::transition(AccountStatus::Closed),
        )
        .await
        .expect_err("created -> closed is not an edge");
    assert!(matches!(error, Error::InvalidTransition { .. }));

    let error = harness
        .store
        .conditional_update(
            "ovm-x",
            &Precondition::absent(TimestampField::VendingDate),
            &AccountMutation::transition(AccountStatus::Vended),
        )
        .await
        .expect_err("status change without expected status");
    assert!(matches!(error, Error::UnguardedTransition { .. }));

    assert_eq!(harness.status_of("ovm-x").await, AccountStatus::Created);
}

#[tokio::test]
async fn absent_field_guard_makes_marks_idempotent() {
    let harness = Harness::new([Account::new("ovm-x", "x@example.com", AccountStatus::Vended)]);
    let guard = Precondition::status(AccountStatus::Vended).and_absent(TimestampField::BurialDate);

    let first = harness
        .store
        .conditional_update(
            "ovm-x",
            &guard,
            &AccountMutation::transition(AccountStatus::Buried)
                .with_timestamp(TimestampField::BurialDate, epoch()),
        )
        .await
        .expect("first mark");
    assert!(first.is_applied());

    let later = epoch() + ChronoDuration::hours(3);
    let second = harness
        .store
        .conditional_update(
            "ovm-x",
            &guard,
            &AccountMutation::transition(AccountStatus::Buried)
                .with_timestamp(TimestampField::BurialDate, later),
        )
        .await
        .expect("second mark");
    assert_eq!(second, UpdateOutcome::PreconditionFailed);

    let record = harness.record("ovm-x").await;
    assert_eq!(record.account_status, AccountStatus::Buried);
    assert_eq!(record.burial_date, Some(epoch()));
    assert_eq!(harness.store.drain_notifications().expect("drain").len(), 1);
}
