//! Hands out ready accounts, at most one caller per account.
//!
//! The allocator never trusts a read: a candidate is only handed out after the
//! `CREATED → VENDED` conditional update succeeds. Losing that race moves on
//! to the next candidate, then to the next page of the status index. When the
//! index is walked without a win but some candidates were contended, the walk
//! starts over.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountStatus, TimestampField};
use crate::clock::Clock;
use crate::contract::{cross_account_role_arn, VendedAccount, DEFAULT_MEMBER_ROLE_NAME};
use crate::error::Result;
use crate::policy::LifecyclePolicy;
use crate::store::{AccountMutation, AccountStore, Precondition, QueryOptions, UpdateOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VendOutcome {
    Vended(VendedAccount),
    OutOfStock,
}

pub struct VendingAllocator {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    member_role_name: String,
    max_attempts: u32,
    candidate_page: usize,
}

impl VendingAllocator {
    pub fn new(
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        policy: &LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            member_role_name: DEFAULT_MEMBER_ROLE_NAME.to_string(),
            max_attempts: policy.vend_max_attempts.max(1),
            candidate_page: policy.vend_candidate_page.max(1),
        }
    }

    pub fn with_member_role_name(mut self, member_role_name: impl Into<String>) -> Self {
        self.member_role_name = member_role_name.into();
        self
    }

    pub async fn vend_one(&self) -> Result<VendOutcome> {
        for attempt in 1..=self.max_attempts {
            let mut contended = false;
            let mut start_after = None;
            loop {
                let options = QueryOptions {
                    start_after: start_after.take(),
                    ..QueryOptions::limit(self.candidate_page)
                };
                let page = self
                    .store
                    .query_by_status(AccountStatus::Created, &options)
                    .await?;

                match self.claim_from(page.items, attempt).await? {
                    PageClaim::Vended(account) => return Ok(VendOutcome::Vended(account)),
                    PageClaim::Contended => contended = true,
                    PageClaim::Unusable => {}
                }
                match page.next {
                    Some(cursor) => start_after = Some(cursor),
                    None => break,
                }
            }

            if !contended {
                info!(component = "vending", event = "out_of_stock", attempt);
                return Ok(VendOutcome::OutOfStock);
            }
        }

        warn!(
            component = "vending",
            event = "contention_exhausted",
            max_attempts = self.max_attempts,
        );
        Ok(VendOutcome::OutOfStock)
    }

    /// Tries the candidates of one page in random order.
    async fn claim_from(&self, mut candidates: Vec<Account>, attempt: u32) -> Result<PageClaim> {
        candidates.shuffle(&mut rand::thread_rng());

        let mut contended = false;
        for candidate in candidates {
            let Some(account_id) = candidate.account_id.clone() else {
                warn!(
                    component = "vending",
                    event = "candidate_missing_account_id",
                    account_name = %candidate.account_name,
                );
                continue;
            };

            let mutation = AccountMutation::transition(AccountStatus::Vended)
                .with_timestamp(TimestampField::VendingDate, self.clock.now());
            let outcome = self
                .store
                .conditional_update(
                    &candidate.account_name,
                    &Precondition::status(AccountStatus::Created),
                    &mutation,
                )
                .await?;

            match outcome {
                UpdateOutcome::Applied(_) => {
                    info!(
                        component = "vending",
                        event = "account_vended",
                        account_name = %candidate.account_name,
                        account_id = %account_id,
                        attempt,
                    );
                    return Ok(PageClaim::Vended(VendedAccount {
                        cross_account_role: cross_account_role_arn(
                            &account_id,
                            &self.member_role_name,
                        ),
                        account_id,
                    }));
                }
                UpdateOutcome::PreconditionFailed | UpdateOutcome::NotFound => {
                    debug!(
                        component = "vending",
                        event = "candidate_contended",
                        account_name = %candidate.account_name,
                    );
                    contended = true;
                }
            }
        }

        Ok(if contended {
            PageClaim::Contended
        } else {
            PageClaim::Unusable
        })
    }
}

enum PageClaim {
    Vended(VendedAccount),
    /// Another caller took at least one candidate.
    Contended,
    /// Empty page, or every candidate lacks an account id.
    Unusable,
}
