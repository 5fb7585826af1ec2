//! Reclaims vended root accounts into the graveyard OU.
//!
//! There is no stored step pointer. Every run starts from [`BurialState::Inviting`]
//! and infers progress from the provider: a duplicate handshake means the
//! invite already went out, an already-accepted handshake means the account
//! joined, and the account's current parent tells whether the move happened.
//! The final mark is guarded on `burial_date` being absent, so repeated runs
//! end as no-ops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::{Account, AccountStatus, TimestampField};
use crate::classify::{Failure, Matcher, Rules};
use crate::clock::{saturating_add, Clock};
use crate::error::Result;
use crate::policy::LifecyclePolicy;
use crate::provider::{codes, OrganizationsApi, ProviderError, ProviderRole};
use crate::store::{AccountMutation, AccountStore, Precondition, StatusScan};

pub const INVITE_NOTES: &str = "Invitation to clean up a disposable test account";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BurialState {
    Inviting,
    FetchingHandshake,
    Accepting {
        handshake_id: String,
    },
    InspectingParent {
        probes: u32,
        moves: u32,
    },
    Moving {
        source_parent_id: String,
        moves: u32,
    },
    Marking,
    Buried,
    /// The guard failed: an earlier run already buried the record, or it left `VENDED`.
    AlreadyBuried,
    /// Needs an operator; recorded on the account.
    HosedUp {
        error_message: String,
    },
    /// Gave up on a transient condition; the next sweep starts over.
    Interrupted {
        reason: String,
    },
}

impl BurialState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Buried | Self::AlreadyBuried | Self::HosedUp { .. } | Self::Interrupted { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Inviting => "inviting",
            Self::FetchingHandshake => "fetching_handshake",
            Self::Accepting { .. } => "accepting",
            Self::InspectingParent { .. } => "inspecting_parent",
            Self::Moving { .. } => "moving",
            Self::Marking => "marking",
            Self::Buried => "buried",
            Self::AlreadyBuried => "already_buried",
            Self::HosedUp { .. } => "hosed_up",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}

/// How a step reacts to a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaction {
    /// The step's goal is already met.
    Proceed,
    FetchExisting,
    Retry,
    Interrupt,
    HosedUp,
}

fn throttled() -> Matcher {
    Matcher::AnyOf(vec![
        Matcher::code(codes::TOO_MANY_REQUESTS),
        Matcher::code(codes::CONCURRENT_MODIFICATION),
        Matcher::code(codes::THROTTLING),
        Matcher::code(codes::THROTTLING_EXCEPTION),
    ])
}

fn invite_rules() -> Rules<Reaction> {
    Rules::new(Reaction::HosedUp)
        .rule(Matcher::code(codes::DUPLICATE_HANDSHAKE), Reaction::FetchExisting)
        .rule(Matcher::code(codes::DUPLICATE_ACCOUNT), Reaction::Proceed)
        .rule(throttled(), Reaction::Interrupt)
}

fn fetch_rules() -> Rules<Reaction> {
    Rules::new(Reaction::HosedUp).rule(throttled(), Reaction::Interrupt)
}

fn accept_rules() -> Rules<Reaction> {
    Rules::new(Reaction::HosedUp)
        .rule(
            Matcher::AnyOf(vec![
                Matcher::code(codes::HANDSHAKE_CONSTRAINT_VIOLATION),
                Matcher::code(codes::INVALID_HANDSHAKE_TRANSITION),
            ]),
            Reaction::Proceed,
        )
        .rule(throttled(), Reaction::Interrupt)
}

fn parent_rules() -> Rules<Reaction> {
    Rules::new(Reaction::HosedUp).rule(
        Matcher::AnyOf(vec![
            Matcher::code(codes::CHILD_NOT_FOUND),
            Matcher::code(codes::ACCOUNT_NOT_FOUND),
            throttled(),
        ]),
        Reaction::Retry,
    )
}

fn move_rules() -> Rules<Reaction> {
    Rules::new(Reaction::HosedUp).rule(
        Matcher::AnyOf(vec![
            Matcher::code(codes::SOURCE_PARENT_NOT_FOUND),
            Matcher::code(codes::DUPLICATE_ACCOUNT),
            throttled(),
        ]),
        Reaction::Retry,
    )
}

fn react(rules: &Rules<Reaction>, error: &ProviderError) -> Reaction {
    rules.classify(&Failure::from(error))
}

/// The account a burial run works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurialTarget {
    pub account_name: String,
    pub account_email: String,
    pub account_id: String,
}

impl BurialTarget {
    /// `None` when the record has no account id yet.
    pub fn from_account(account: &Account) -> Option<Self> {
        Some(Self {
            account_name: account.account_name.clone(),
            account_email: account.account_email.clone(),
            account_id: account.account_id.clone()?,
        })
    }
}

pub struct BurialWorkflow {
    store: Arc<dyn AccountStore>,
    organizations: Arc<dyn OrganizationsApi>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    graveyard_ou_id: String,
}

impl BurialWorkflow {
    pub fn new(
        store: Arc<dyn AccountStore>,
        organizations: Arc<dyn OrganizationsApi>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        graveyard_ou_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            organizations,
            clock,
            policy,
            graveyard_ou_id: graveyard_ou_id.into(),
        }
    }

    /// Runs the workflow from scratch until it buries, gives up or hoses up.
    pub async fn run(&self, target: &BurialTarget) -> Result<BurialState> {
        let mut state = BurialState::Inviting;
        while !state.is_finished() {
            let next = self.advance(state.clone(), target).await?;
            info!(
                component = "burial",
                event = "state_changed",
                account_name = %target.account_name,
                from = state.name(),
                to = next.name(),
            );
            state = next;
        }

        match &state {
            BurialState::HosedUp { error_message } => {
                warn!(
                    component = "burial",
                    event = "hosed_up",
                    account_name = %target.account_name,
                    error_message = %error_message,
                );
                self.store
                    .conditional_update(
                        &target.account_name,
                        &Precondition::status(AccountStatus::Vended),
                        &AccountMutation::annotate()
                            .with_error_message(error_message.clone())
                            .with_timestamp(TimestampField::FailureDate, self.clock.now()),
                    )
                    .await?;
            }
            BurialState::Interrupted { reason } => {
                info!(
                    component = "burial",
                    event = "interrupted",
                    account_name = %target.account_name,
                    reason = %reason,
                );
            }
            _ => {}
        }
        Ok(state)
    }

    async fn advance(&self, state: BurialState, target: &BurialTarget) -> Result<BurialState> {
        let management = ProviderRole::Management;
        let member = ProviderRole::member(target.account_id.clone());

        let next = match state {
            BurialState::Inviting => {
                match self
                    .organizations
                    .invite_account(&management, &target.account_email, INVITE_NOTES)
                    .await
                {
                    Ok(handshake) => BurialState::Accepting {
                        handshake_id: handshake.id,
                    },
                    Err(error) => match react(&invite_rules(), &error) {
                        Reaction::FetchExisting => BurialState::FetchingHandshake,
                        Reaction::Proceed => BurialState::InspectingParent {
                            probes: 0,
                            moves: 0,
                        },
                        reaction => give_up(reaction, "invite", &error),
                    },
                }
            }
            BurialState::FetchingHandshake => {
                match self.organizations.list_handshakes_for_account(&member).await {
                    Ok(handshakes) => match handshakes.into_iter().next() {
                        Some(handshake) => BurialState::Accepting {
                            handshake_id: handshake.id,
                        },
                        None => BurialState::HosedUp {
                            error_message: "invite reported as duplicate but no handshake is listed"
                                .to_string(),
                        },
                    },
                    Err(error) => give_up(react(&fetch_rules(), &error), "list handshakes", &error),
                }
            }
            BurialState::Accepting { handshake_id } => {
                match self
                    .organizations
                    .accept_handshake(&member, &handshake_id)
                    .await
                {
                    Ok(()) => BurialState::InspectingParent {
                        probes: 0,
                        moves: 0,
                    },
                    Err(error) => match react(&accept_rules(), &error) {
                        Reaction::Proceed => BurialState::InspectingParent {
                            probes: 0,
                            moves: 0,
                        },
                        reaction => give_up(reaction, "accept handshake", &error),
                    },
                }
            }
            BurialState::InspectingParent { probes, moves } => {
                match self
                    .organizations
                    .list_parents(&management, &target.account_id)
                    .await
                {
                    Ok(parents) => match parents.into_iter().next() {
                        Some(parent) if parent == self.graveyard_ou_id => BurialState::Marking,
                        Some(parent) => BurialState::Moving {
                            source_parent_id: parent,
                            moves,
                        },
                        None => self.reprobe(probes, moves, "account has no parent yet").await,
                    },
                    Err(error) => match react(&parent_rules(), &error) {
                        Reaction::Retry => self.reprobe(probes, moves, &error.to_string()).await,
                        reaction => give_up(reaction, "list parents", &error),
                    },
                }
            }
            BurialState::Moving {
                source_parent_id,
                moves,
            } => {
                if moves >= self.policy.max_move_attempts {
                    BurialState::Interrupted {
                        reason: format!("move not confirmed after {moves} attempts"),
                    }
                } else {
                    let result = self
                        .organizations
                        .move_account(
                            &management,
                            &target.account_id,
                            &source_parent_id,
                            &self.graveyard_ou_id,
                        )
                        .await;
                    let recheck = BurialState::InspectingParent {
                        probes: 0,
                        moves: moves + 1,
                    };
                    match result {
                        Ok(()) => recheck,
                        Err(error) => match react(&move_rules(), &error) {
                            Reaction::Retry => recheck,
                            reaction => give_up(reaction, "move account", &error),
                        },
                    }
                }
            }
            BurialState::Marking => {
                let outcome = self
                    .store
                    .conditional_update(
                        &target.account_name,
                        &Precondition::status(AccountStatus::Vended)
                            .and_absent(TimestampField::BurialDate),
                        &AccountMutation::transition(AccountStatus::Buried)
                            .with_timestamp(TimestampField::BurialDate, self.clock.now()),
                    )
                    .await?;
                if outcome.is_applied() {
                    BurialState::Buried
                } else {
                    BurialState::AlreadyBuried
                }
            }
            finished => finished,
        };
        Ok(next)
    }

    async fn reprobe(&self, probes: u32, moves: u32, reason: &str) -> BurialState {
        let probes = probes + 1;
        if probes >= self.policy.parent_probe_attempts {
            return BurialState::Interrupted {
                reason: format!("parent lookup failed after {probes} attempts: {reason}"),
            };
        }
        self.clock.sleep(self.policy.parent_probe_delay()).await;
        BurialState::InspectingParent { probes, moves }
    }
}

fn give_up(reaction: Reaction, step: &str, error: &ProviderError) -> BurialState {
    match reaction {
        Reaction::Interrupt | Reaction::Retry => BurialState::Interrupted {
            reason: format!("{step}: {error}"),
        },
        _ => BurialState::HosedUp {
            error_message: format!("{step}: {error}"),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurialReport {
    pub buried: usize,
    pub already_buried: usize,
    pub hosed_up: usize,
    pub interrupted: usize,
}

/// Scheduled pass over vended accounts whose grace period is over.
pub struct BurialSweep {
    store: Arc<dyn AccountStore>,
    workflow: BurialWorkflow,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
}

impl BurialSweep {
    pub fn new(
        store: Arc<dyn AccountStore>,
        workflow: BurialWorkflow,
        clock: Arc<dyn Clock>,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            workflow,
            clock,
            grace_period,
        }
    }

    pub async fn run(&self) -> Result<BurialReport> {
        let now = self.clock.now();
        let vended = StatusScan::new(self.store.as_ref(), AccountStatus::Vended)
            .collect_all()
            .await?;

        let mut report = BurialReport::default();
        for account in vended {
            if !due_for_burial(&account, now, self.grace_period) {
                continue;
            }
            let Some(target) = BurialTarget::from_account(&account) else {
                continue;
            };
            match self.workflow.run(&target).await? {
                BurialState::Buried => report.buried += 1,
                BurialState::AlreadyBuried => report.already_buried += 1,
                BurialState::HosedUp { .. } => report.hosed_up += 1,
                _ => report.interrupted += 1,
            }
        }

        info!(
            component = "burial",
            event = "sweep_completed",
            buried = report.buried,
            already_buried = report.already_buried,
            hosed_up = report.hosed_up,
            interrupted = report.interrupted,
        );
        Ok(report)
    }
}

/// Vended, past the grace period, and not flagged for an operator.
pub fn due_for_burial(account: &Account, now: DateTime<Utc>, grace_period: Duration) -> bool {
    account.account_status == AccountStatus::Vended
        && account.account_id.is_some()
        && account.failure_date.is_none()
        && account
            .vending_date
            .map_or(true, |vended| saturating_add(vended, grace_period) <= now)
}
