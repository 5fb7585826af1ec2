mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{created, epoch, hours, vended, Harness};
use vending_core::contract::AccountRequest;
use vending_core::external::TaskOutcome;
use vending_core::testing::ScriptedTask;
use vending_core::vending::{VendOutcome, VendingAllocator};
use vending_core::workflow::decommission::{
    decommission_trigger, DecommissionRunner, DecommissionState, RunOutcome,
};
use vending_core::AccountStatus;

fn runner(harness: &Harness, task: Arc<ScriptedTask>) -> DecommissionRunner {
    DecommissionRunner::new(
        harness.store.clone(),
        task,
        harness.clock.clone(),
        harness.policy.clone(),
    )
}

#[tokio::test]
async fn vend_then_close_already_closed_account_end_to_end() {
    let harness = Harness::new([created("a1", "123456789012")]);
    let allocator = VendingAllocator::new(
        harness.store.clone(),
        harness.clock.clone(),
        &harness.policy,
    );

    let VendOutcome::Vended(account) = allocator.vend_one().await.expect("vend") else {
        panic!("a1 should be vended");
    };
    assert_eq!(account.account_id, "123456789012");
    let record = harness.record("a1").await;
    assert_eq!(record.account_status, AccountStatus::Vended);
    assert_eq!(record.vending_date, Some(epoch()));

    let triggers: Vec<AccountRequest> = harness
        .store
        .drain_notifications()
        .expect("drain")
        .iter()
        .filter_map(decommission_trigger)
        .collect();
    assert_eq!(triggers.len(), 1);

    let task = Arc::new(ScriptedTask::repeating(TaskOutcome::failed(
        "account apparently already closed",
    )));
    let runner = runner(&harness, task.clone()).with_wait_budget(Duration::from_secs(60));

    // The same change delivered twice yields two tickets.
    let ticket = runner.start(&triggers[0]);
    let duplicate = runner.start(&triggers[0]);

    let RunOutcome::Deferred { ticket, resume_at } =
        runner.run(ticket).await.expect("first run")
    else {
        panic!("grace period should defer the run");
    };
    assert_eq!(resume_at, epoch() + chrono::Duration::hours(24));
    assert_eq!(task.call_count(), 0);

    harness.clock.advance(hours(24));
    let outcome = runner.run(ticket).await.expect("resumed run");
    assert_eq!(outcome, RunOutcome::Finished(DecommissionState::Closed));

    let record = harness.record("a1").await;
    assert_eq!(record.account_status, AccountStatus::Closed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("account apparently already closed")
    );
    assert_eq!(
        record.deletion_date,
        Some(epoch() + chrono::Duration::hours(24))
    );

    let duplicate = runner.run(duplicate).await.expect("duplicate run");
    assert_eq!(
        duplicate,
        RunOutcome::Finished(DecommissionState::Superseded {
            status: Some(AccountStatus::Closed)
        })
    );
    assert_eq!(task.call_count(), 1);
    assert_eq!(harness.record("a1").await, record);

    let later: Vec<_> = harness
        .store
        .drain_notifications()
        .expect("drain")
        .iter()
        .filter_map(decommission_trigger)
        .collect();
    assert!(later.is_empty(), "VENDED -> CLOSED must not re-trigger");
}

#[tokio::test]
async fn password_reset_reaches_failed_without_retrying() {
    let harness = Harness::new([vended("ovm-pw", "1", epoch())]);
    let task = Arc::new(ScriptedTask::repeating(TaskOutcome::failed(
        "Password reset required: check the root user's inbox",
    )));
    let runner = runner(&harness, task.clone());

    let ticket = runner.start(&AccountRequest::new("ovm-pw", "test+ovm-pw@example.com"));
    let outcome = runner.run(ticket).await.expect("run");

    assert_eq!(outcome, RunOutcome::Finished(DecommissionState::Failed));
    assert_eq!(task.call_count(), 1);
    let record = harness.record("ovm-pw").await;
    assert_eq!(record.account_status, AccountStatus::Failed);
    assert!(record.failure_date.is_some());
    assert!(record
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("Password reset")));
}

#[tokio::test]
async fn unrecognized_failure_schedules_a_retry() {
    let harness = Harness::new([vended("ovm-flaky", "1", epoch())]);
    let task = Arc::new(ScriptedTask::repeating(TaskOutcome::failed(
        "TimeoutError: waiting for selector failed",
    )));
    let runner = runner(&harness, task.clone()).with_wait_budget(Duration::from_secs(60));

    let ticket = runner.start(&AccountRequest::new("ovm-flaky", "test+ovm-flaky@example.com"));
    let RunOutcome::Deferred { ticket, .. } = runner.run(ticket).await.expect("grace") else {
        panic!("grace period should defer");
    };
    harness.clock.advance(hours(24));

    let RunOutcome::Deferred { ticket, resume_at } =
        runner.run(ticket).await.expect("first attempt")
    else {
        panic!("an unrecognized failure should back off");
    };
    assert!(matches!(
        ticket.state,
        DecommissionState::BackingOff {
            failed_attempts: 1,
            ..
        }
    ));
    assert_eq!(resume_at, epoch() + chrono::Duration::hours(27));
    assert_eq!(task.call_count(), 1);
    assert_eq!(harness.status_of("ovm-flaky").await, AccountStatus::Vended);

    // Redelivered early: defers again without calling the task.
    let RunOutcome::Deferred { .. } = runner.run(ticket).await.expect("early redelivery") else {
        panic!("early redelivery should defer");
    };
    assert_eq!(task.call_count(), 1);
}

#[tokio::test]
async fn exhausted_retries_escalate_and_leave_the_record_vended() {
    let harness = Harness::new([vended("ovm-stuck", "1", epoch())]);
    let task = Arc::new(ScriptedTask::repeating(TaskOutcome::failed("socket hang up")));
    let runner = runner(&harness, task.clone());

    let ticket = runner.start(&AccountRequest::new("ovm-stuck", "test+ovm-stuck@example.com"));
    let outcome = runner.run(ticket).await.expect("run");

    assert_eq!(outcome, RunOutcome::Finished(DecommissionState::Escalated));
    assert_eq!(task.call_count(), 4);
    assert_eq!(
        harness.clock.sleeps(),
        vec![
            hours(24),
            Duration::from_secs(10_800),
            Duration::from_secs(16_200),
            Duration::from_secs(24_300),
        ]
    );

    let record = harness.record("ovm-stuck").await;
    assert_eq!(record.account_status, AccountStatus::Vended);
    assert_eq!(record.error_message.as_deref(), Some("socket hang up"));
    assert!(record.failure_date.is_some());
}

#[tokio::test]
async fn trigger_for_an_account_no_longer_vended_is_superseded() {
    let mut record = vended("ovm-gone", "1", epoch());
    record.account_status = AccountStatus::Buried;
    let harness = Harness::new([record]);
    let task = Arc::new(ScriptedTask::repeating(TaskOutcome::succeeded()));
    let runner = runner(&harness, task.clone());

    let ticket = runner.start(&AccountRequest::new("ovm-gone", "test+ovm-gone@example.com"));
    let outcome = runner.run(ticket).await.expect("run");

    assert_eq!(
        outcome,
        RunOutcome::Finished(DecommissionState::Superseded {
            status: Some(AccountStatus::Buried)
        })
    );
    assert_eq!(task.call_count(), 0);
}
