//! Per-account teardown after the grace period.
//!
//! The workflow is a pure transition function over [`DecommissionState`];
//! [`DecommissionRunner`] executes the emitted [`Effect`]s. Waits longer than
//! the runner's budget are not slept in-process: the runner returns the
//! serialized [`DecommissionTicket`] so the caller can park it on a delayed
//! queue and resume later.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::{AccountStatus, TimestampField};
use crate::classify::{Failure, Matcher, Rules};
use crate::clock::{saturating_add, Clock};
use crate::contract::AccountRequest;
use crate::error::{Error, Result};
use crate::external::{ExternalTask, TaskOutcome};
use crate::policy::LifecyclePolicy;
use crate::retry::RetryPolicy;
use crate::store::{AccountMutation, AccountStore, ChangeNotification, Precondition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecommissionState {
    /// Grace period before any closure action.
    Waiting { until: DateTime<Utc> },
    /// Re-reading the record before a closure attempt.
    Verifying { failed_attempts: u32 },
    Closing { failed_attempts: u32 },
    BackingOff {
        failed_attempts: u32,
        until: DateTime<Utc>,
        last_error: String,
    },
    Marking {
        target: MarkTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    Closed,
    Failed,
    /// Retry ceiling exhausted; the record stays `VENDED` for an operator.
    Escalated,
    /// The record was no longer `VENDED`, or a concurrent run marked it first.
    Superseded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<AccountStatus>,
    },
}

impl DecommissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Failed | Self::Escalated | Self::Superseded { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Verifying { .. } => "verifying",
            Self::Closing { .. } => "closing",
            Self::BackingOff { .. } => "backing_off",
            Self::Marking { .. } => "marking",
            Self::Closed => "closed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::Superseded { .. } => "superseded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkTarget {
    Closed,
    Failed,
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Resumed { now: DateTime<Utc> },
    AccountLoaded { status: Option<AccountStatus> },
    ClosureSucceeded,
    ClosureFailed { reason: String, at: DateTime<Utc> },
    MarkApplied,
    MarkSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    WaitUntil(DateTime<Utc>),
    LoadAccount,
    InvokeClosure,
    MarkClosed { error_message: Option<String> },
    MarkFailed { error_message: String },
    RecordEscalation { error_message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: DecommissionState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: DecommissionState, effect: Effect) -> Self {
        Self {
            state,
            effect: Some(effect),
        }
    }

    fn done(state: DecommissionState) -> Self {
        Self {
            state,
            effect: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureVerdict {
    AlreadyClosed,
    Unrecoverable,
    Retry,
}

/// First match wins. Waits that timed out may echo the text they were waiting
/// for, so they are ruled out before the already-closed phrases.
pub fn closure_rules() -> Rules<ClosureVerdict> {
    Rules::new(ClosureVerdict::Retry)
        .rule(
            Matcher::AnyOf(vec![
                Matcher::contains("timeout"),
                Matcher::contains("waiting failed"),
                Matcher::like("*ms exceeded*"),
            ]),
            ClosureVerdict::Retry,
        )
        .rule(
            Matcher::AnyOf(vec![
                Matcher::contains("password reset"),
                Matcher::contains("reset your password"),
                Matcher::contains("password recovery"),
            ]),
            ClosureVerdict::Unrecoverable,
        )
        .rule(
            Matcher::AnyOf(vec![
                Matcher::contains("already closed"),
                Matcher::contains("already suspended"),
                Matcher::contains("account is suspended"),
            ]),
            ClosureVerdict::AlreadyClosed,
        )
}

pub fn classify_closure_failure(reason: &str) -> ClosureVerdict {
    closure_rules().classify(&Failure::from_message(reason))
}

/// Initial state for a trigger observed at `now`.
pub fn start(now: DateTime<Utc>, grace_period: Duration) -> DecommissionState {
    DecommissionState::Waiting {
        until: saturating_add(now, grace_period),
    }
}

/// Advances the workflow by one event.
pub fn step(state: DecommissionState, event: Event, retry: &RetryPolicy) -> Result<Transition> {
    use DecommissionState as S;

    let transition = match (state, event) {
        (S::Waiting { until }, Event::Resumed { now }) => {
            if now >= until {
                Transition::to(S::Verifying { failed_attempts: 0 }, Effect::LoadAccount)
            } else {
                Transition::to(S::Waiting { until }, Effect::WaitUntil(until))
            }
        }
        (
            S::BackingOff {
                failed_attempts,
                until,
                last_error,
            },
            Event::Resumed { now },
        ) => {
            if now >= until {
                Transition::to(S::Verifying { failed_attempts }, Effect::LoadAccount)
            } else {
                Transition::to(
                    S::BackingOff {
                        failed_attempts,
                        until,
                        last_error,
                    },
                    Effect::WaitUntil(until),
                )
            }
        }
        (S::Verifying { failed_attempts }, Event::AccountLoaded { status }) => {
            if status == Some(AccountStatus::Vended) {
                Transition::to(S::Closing { failed_attempts }, Effect::InvokeClosure)
            } else {
                Transition::done(S::Superseded { status })
            }
        }
        (S::Closing { .. }, Event::ClosureSucceeded) => Transition::to(
            S::Marking {
                target: MarkTarget::Closed,
                error_message: None,
            },
            Effect::MarkClosed {
                error_message: None,
            },
        ),
        (S::Closing { failed_attempts }, Event::ClosureFailed { reason, at }) => {
            match classify_closure_failure(&reason) {
                ClosureVerdict::AlreadyClosed => Transition::to(
                    S::Marking {
                        target: MarkTarget::Closed,
                        error_message: Some(reason.clone()),
                    },
                    Effect::MarkClosed {
                        error_message: Some(reason),
                    },
                ),
                ClosureVerdict::Unrecoverable => Transition::to(
                    S::Marking {
                        target: MarkTarget::Failed,
                        error_message: Some(reason.clone()),
                    },
                    Effect::MarkFailed {
                        error_message: reason,
                    },
                ),
                ClosureVerdict::Retry => {
                    let failed_attempts = failed_attempts.saturating_add(1);
                    if retry.allows_another_attempt(failed_attempts) {
                        let until = saturating_add(at, retry.delay_after(failed_attempts));
                        Transition::to(
                            S::BackingOff {
                                failed_attempts,
                                until,
                                last_error: reason,
                            },
                            Effect::WaitUntil(until),
                        )
                    } else {
                        Transition::to(
                            S::Marking {
                                target: MarkTarget::Escalated,
                                error_message: Some(reason.clone()),
                            },
                            Effect::RecordEscalation {
                                error_message: reason,
                            },
                        )
                    }
                }
            }
        }
        (S::Marking { target, .. }, Event::MarkApplied) => Transition::done(match target {
            MarkTarget::Closed => S::Closed,
            MarkTarget::Failed => S::Failed,
            MarkTarget::Escalated => S::Escalated,
        }),
        (S::Marking { .. }, Event::MarkSkipped) => Transition::done(S::Superseded { status: None }),
        (state, event) => {
            return Err(Error::validation(format!(
                "decommission cannot handle {event:?} in state {}",
                state.name()
            )))
        }
    };
    Ok(transition)
}

/// Returns the request to decommission when a record has just become `VENDED`.
///
/// Writes that leave a vended record vended (error notes) do not re-trigger.
pub fn decommission_trigger(notification: &ChangeNotification) -> Option<AccountRequest> {
    let became_vended = notification.new_status() == AccountStatus::Vended
        && notification.old_status() != Some(AccountStatus::Vended);
    became_vended.then(|| AccountRequest::for_account(&notification.new_image))
}

/// Everything needed to resume a parked decommission run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecommissionTicket {
    pub account_name: String,
    pub account_email: String,
    #[serde(flatten)]
    pub state: DecommissionState,
}

impl DecommissionTicket {
    pub fn request(&self) -> AccountRequest {
        AccountRequest::new(self.account_name.clone(), self.account_email.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(DecommissionState),
    /// The next wait exceeds the runner's budget.
    Deferred {
        ticket: DecommissionTicket,
        resume_at: DateTime<Utc>,
    },
}

pub struct DecommissionRunner {
    store: Arc<dyn AccountStore>,
    task: Arc<dyn ExternalTask>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    wait_budget: Duration,
}

impl DecommissionRunner {
    pub fn new(
        store: Arc<dyn AccountStore>,
        task: Arc<dyn ExternalTask>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            task,
            clock,
            policy,
            wait_budget: Duration::MAX,
        }
    }

    /// Longest wait the runner sleeps through before deferring instead.
    pub fn with_wait_budget(mut self, wait_budget: Duration) -> Self {
        self.wait_budget = wait_budget;
        self
    }

    /// Ticket for a freshly observed trigger; the grace period starts now.
    pub fn start(&self, request: &AccountRequest) -> DecommissionTicket {
        DecommissionTicket {
            account_name: request.account_name.clone(),
            account_email: request.account_email.clone(),
            state: start(self.clock.now(), self.policy.grace_period()),
        }
    }

    pub async fn run(&self, ticket: DecommissionTicket) -> Result<RunOutcome> {
        let request = ticket.request();
        let mut state = ticket.state;
        let mut event = Event::Resumed {
            now: self.clock.now(),
        };

        loop {
            let from = state.name();
            let transition = step(state, event, &self.policy.closure_retry)?;
            state = transition.state;
            if from != state.name() {
                info!(
                    component = "decommission",
                    event = "state_changed",
                    account_name = %request.account_name,
                    from,
                    to = state.name(),
                );
            }

            let Some(effect) = transition.effect else {
                return Ok(RunOutcome::Finished(state));
            };

            event = match effect {
                Effect::WaitUntil(until) => {
                    let remaining = (until - self.clock.now()).to_std().unwrap_or_default();
                    if remaining > self.wait_budget {
                        return Ok(RunOutcome::Deferred {
                            ticket: DecommissionTicket {
                                account_name: request.account_name.clone(),
                                account_email: request.account_email.clone(),
                                state,
                            },
                            resume_at: until,
                        });
                    }
                    self.clock.sleep(remaining).await;
                    Event::Resumed {
                        now: self.clock.now(),
                    }
                }
                Effect::LoadAccount => Event::AccountLoaded {
                    status: self
                        .store
                        .get(&request.account_name)
                        .await?
                        .map(|account| account.account_status),
                },
                Effect::InvokeClosure => match self.task.run(&request).await {
                    TaskOutcome::Succeeded { .. } => Event::ClosureSucceeded,
                    TaskOutcome::Failed { reason } => {
                        warn!(
                            component = "decommission",
                            event = "closure_failed",
                            account_name = %request.account_name,
                            reason = %reason,
                        );
                        Event::ClosureFailed {
                            reason,
                            at: self.clock.now(),
                        }
                    }
                },
                Effect::MarkClosed { error_message } => {
                    let mut mutation = AccountMutation::transition(AccountStatus::Closed)
                        .with_timestamp(TimestampField::DeletionDate, self.clock.now());
                    if let Some(message) = error_message {
                        mutation = mutation.with_error_message(message);
                    }
                    self.mark(&request.account_name, &mutation).await?
                }
                Effect::MarkFailed { error_message } => {
                    let mutation = AccountMutation::transition(AccountStatus::Failed)
                        .with_timestamp(TimestampField::FailureDate, self.clock.now())
                        .with_error_message(error_message);
                    self.mark(&request.account_name, &mutation).await?
                }
                Effect::RecordEscalation { error_message } => {
                    warn!(
                        component = "decommission",
                        event = "retries_exhausted",
                        account_name = %request.account_name,
                        error_message = %error_message,
                    );
                    let mutation = AccountMutation::annotate()
                        .with_timestamp(TimestampField::FailureDate, self.clock.now())
                        .with_error_message(error_message);
                    self.mark(&request.account_name, &mutation).await?
                }
            };
        }
    }

    async fn mark(&self, account_name: &str, mutation: &AccountMutation) -> Result<Event> {
        let outcome = self
            .store
            .conditional_update(
                account_name,
                &Precondition::status(AccountStatus::Vended),
                mutation,
            )
            .await?;
        Ok(if outcome.is_applied() {
            Event::MarkApplied
        } else {
            info!(
                component = "decommission",
                event = "mark_skipped",
                account_name,
            );
            Event::MarkSkipped
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::account::Account;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn waiting_holds_until_the_grace_period_elapses() {
        let retry = RetryPolicy::default();
        let waiting = start(at(0), Duration::from_secs(3_600));

        let early = step(waiting.clone(), Event::Resumed { now: at(0) }, &retry).unwrap();
        assert_eq!(early.effect, Some(Effect::WaitUntil(at(1))));

        let due = step(waiting, Event::Resumed { now: at(1) }, &retry).unwrap();
        assert_eq!(due.state, DecommissionState::Verifying { failed_attempts: 0 });
        assert_eq!(due.effect, Some(Effect::LoadAccount));
    }

    #[test]
    fn password_reset_fails_without_retry() {
        let transition = step(
            DecommissionState::Closing { failed_attempts: 0 },
            Event::ClosureFailed {
                reason: "Password reset required for root user".into(),
                at: at(2),
            },
            &RetryPolicy::default(),
        )
        .unwrap();

        assert_eq!(
            transition.effect,
            Some(Effect::MarkFailed {
                error_message: "Password reset required for root user".into()
            })
        );
        let done = step(transition.state, Event::MarkApplied, &RetryPolicy::default()).unwrap();
        assert_eq!(done.state, DecommissionState::Failed);
        assert_eq!(done.effect, None);
    }

    #[test]
    fn unrecognized_failure_backs_off_then_escalates_at_the_ceiling() {
        let retry = RetryPolicy {
            interval_secs: 3_600,
            backoff_rate: 1.5,
            max_attempts: 2,
            max_delay_secs: 86_400,
        };

        let first = step(
            DecommissionState::Closing { failed_attempts: 0 },
            Event::ClosureFailed {
                reason: "Navigation timeout of 30000 ms exceeded".into(),
                at: at(2),
            },
            &retry,
        )
        .unwrap();
        assert_eq!(first.effect, Some(Effect::WaitUntil(at(3))));
        assert!(matches!(
            first.state,
            DecommissionState::BackingOff {
                failed_attempts: 1,
                ..
            }
        ));

        let second = step(
            DecommissionState::Closing { failed_attempts: 1 },
            Event::ClosureFailed {
                reason: "Navigation timeout of 30000 ms exceeded".into(),
                at: at(4),
            },
            &retry,
        )
        .unwrap();
        assert!(matches!(
            second.effect,
            Some(Effect::RecordEscalation { .. })
        ));
    }

    #[test]
    fn already_closed_and_suspended_count_as_success() {
        assert_eq!(
            classify_closure_failure("account apparently already closed"),
            ClosureVerdict::AlreadyClosed
        );
        assert_eq!(
            classify_closure_failure("Account is Suspended"),
            ClosureVerdict::AlreadyClosed
        );
        assert_eq!(classify_closure_failure("boom"), ClosureVerdict::Retry);
    }

    #[test]
    fn timed_out_suspension_check_is_retried() {
        let reason = "Waiting failed: 1000ms exceeded while waiting for \
            document.querySelector(\"body\").innerText.includes(\"Authentication failed \
            because your account has been suspended.\")";
        assert_eq!(classify_closure_failure(reason), ClosureVerdict::Retry);
        assert_eq!(
            classify_closure_failure("Timeout: closure task exceeded 840s"),
            ClosureVerdict::Retry
        );
        assert_eq!(
            classify_closure_failure("the account has been suspended"),
            ClosureVerdict::Retry
        );
    }

    #[test]
    fn unexpected_events_are_rejected() {
        let error = step(DecommissionState::Closed, Event::ClosureSucceeded, &RetryPolicy::default())
            .expect_err("terminal state");
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn trigger_fires_only_on_entry_into_vended() {
        let created = Account::new("ovm-1", "a@b.c", AccountStatus::Created);
        let mut vended = created.clone();
        vended.account_status = AccountStatus::Vended;
        let mut noted = vended.clone();
        noted.error_message = Some("note".into());

        let entry = ChangeNotification {
            old_image: Some(created),
            new_image: vended.clone(),
        };
        assert_eq!(
            decommission_trigger(&entry),
            Some(AccountRequest::new("ovm-1", "a@b.c"))
        );

        let note = ChangeNotification {
            old_image: Some(vended),
            new_image: noted,
        };
        assert_eq!(decommission_trigger(&note), None);
    }

    #[test]
    fn ticket_serializes_with_flattened_state() {
        let ticket = DecommissionTicket {
            account_name: "ovm-1".into(),
            account_email: "a@b.c".into(),
            state: DecommissionState::Waiting { until: at(5) },
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["state"], "waiting");
        assert_eq!(json["account_name"], "ovm-1");
        let parsed: DecommissionTicket = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ticket);
    }
}
