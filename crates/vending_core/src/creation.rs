//! Keeps the pool of ready accounts topped up.
//!
//! The [`CreationScheduler`] runs on a fixed cadence, requeues stalled
//! `TO_CREATE` records and inserts one new `TO_CREATE` record plus a creation
//! request per missing slot. The [`ProvisioningWorker`] consumes those
//! requests and runs the external sign-up task.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::account::{Account, AccountStatus, TimestampField};
use crate::clock::{saturating_add, Clock};
use crate::contract::{AccountRequest, QueueMessage};
use crate::error::{Error, Result};
use crate::external::{ExternalTask, TaskOutcome};
use crate::policy::LifecyclePolicy;
use crate::queue::MessageQueue;
use crate::store::{AccountMutation, AccountStore, Precondition, StatusScan, UpdateOutcome};

pub const DEFAULT_ACCOUNT_NAME_PREFIX: &str = "ovm";
pub const DEFAULT_ACCOUNT_EMAIL_TEMPLATE: &str = "superwerker-aws-test+{suffix}@superluminar.io";
const SUFFIX_PLACEHOLDER: &str = "{suffix}";

/// Number of accounts to request so the pool reaches `target`. Never negative.
pub fn creation_deficit(target: usize, ready: usize) -> usize {
    target.saturating_sub(ready)
}

/// Generates `{prefix}-{suffix}` names and matching emails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNaming {
    prefix: String,
    email_template: String,
}

impl Default for AccountNaming {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_ACCOUNT_NAME_PREFIX.to_string(),
            email_template: DEFAULT_ACCOUNT_EMAIL_TEMPLATE.to_string(),
        }
    }
}

impl AccountNaming {
    pub fn new(prefix: impl Into<String>, email_template: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let email_template = email_template.into();
        if prefix.trim().is_empty() {
            return Err(Error::validation("account name prefix cannot be empty"));
        }
        if !email_template.contains(SUFFIX_PLACEHOLDER) || !email_template.contains('@') {
            return Err(Error::validation(format!(
                "email template '{email_template}' must be an address containing {SUFFIX_PLACEHOLDER}"
            )));
        }
        Ok(Self {
            prefix,
            email_template,
        })
    }

    pub fn request_for_suffix(&self, suffix: &str) -> AccountRequest {
        AccountRequest::new(
            format!("{}-{suffix}", self.prefix),
            self.email_template.replace(SUFFIX_PLACEHOLDER, suffix),
        )
    }

    pub fn generate(&self) -> AccountRequest {
        self.request_for_suffix(&random_suffix())
    }
}

/// 12 random lowercase hex characters.
pub fn random_suffix() -> String {
    let value: u64 = rand::thread_rng().gen::<u64>() & 0xffff_ffff_ffff;
    format!("{value:012x}")
}

/// Counters for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationReport {
    pub requeued: usize,
    pub deficit: usize,
    pub requested: usize,
    pub enqueue_failures: usize,
    pub name_collisions: usize,
}

pub struct CreationScheduler {
    store: Arc<dyn AccountStore>,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
    naming: AccountNaming,
    policy: LifecyclePolicy,
}

impl CreationScheduler {
    pub fn new(
        store: Arc<dyn AccountStore>,
        queue: Arc<dyn MessageQueue>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            naming: AccountNaming::default(),
            policy,
        }
    }

    pub fn with_naming(mut self, naming: AccountNaming) -> Self {
        self.naming = naming;
        self
    }

    pub async fn run(&self) -> Result<CreationReport> {
        let mut report = CreationReport {
            requeued: self.requeue_stalled().await?,
            ..CreationReport::default()
        };

        let ready = self.store.count_by_status(AccountStatus::Created).await?
            + self.store.count_by_status(AccountStatus::ToCreate).await?;
        report.deficit = creation_deficit(self.policy.target_pool_size, ready);

        for _ in 0..report.deficit {
            let request = self.naming.generate();
            let account = Account::new(
                request.account_name.clone(),
                request.account_email.clone(),
                AccountStatus::ToCreate,
            )
            .with_timestamp(TimestampField::RequestedDate, self.clock.now());

            if !self.store.put_if_absent(&account).await? {
                warn!(
                    component = "creation_scheduler",
                    event = "name_collision",
                    account_name = %request.account_name,
                );
                report.name_collisions += 1;
                continue;
            }

            match self
                .queue
                .send(&QueueMessage::CreationRequest(request.clone()), None)
                .await
            {
                Ok(()) => {
                    info!(
                        component = "creation_scheduler",
                        event = "creation_requested",
                        account_name = %request.account_name,
                    );
                    report.requested += 1;
                }
                Err(error) => {
                    warn!(
                        component = "creation_scheduler",
                        event = "enqueue_failed",
                        account_name = %request.account_name,
                        error = %error,
                    );
                    report.enqueue_failures += 1;
                }
            }
        }

        info!(
            component = "creation_scheduler",
            event = "run_completed",
            ready,
            deficit = report.deficit,
            requested = report.requested,
            requeued = report.requeued,
            enqueue_failures = report.enqueue_failures,
        );
        Ok(report)
    }

    /// Re-enqueues `TO_CREATE` records that saw no request or claim within the
    /// stalled threshold. A stale worker claim is released first so the
    /// redelivered request can be claimed again.
    async fn requeue_stalled(&self) -> Result<usize> {
        let now = self.clock.now();
        let stalled_after = self.policy.stalled_creation_after();
        let pending = StatusScan::new(self.store.as_ref(), AccountStatus::ToCreate)
            .collect_all()
            .await?;

        let mut requeued = 0;
        for account in pending {
            let last_activity = account.requested_date.max(account.provisioning_started_date);
            let stalled =
                last_activity.map_or(true, |at| saturating_add(at, stalled_after) <= now);
            if !stalled {
                continue;
            }

            let restarted = self
                .store
                .conditional_update(
                    &account.account_name,
                    &Precondition::status(AccountStatus::ToCreate),
                    &AccountMutation::annotate()
                        .with_timestamp(TimestampField::RequestedDate, now)
                        .without_timestamp(TimestampField::ProvisioningStartedDate),
                )
                .await?;
            if !restarted.is_applied() {
                continue;
            }

            let request = AccountRequest::for_account(&account);
            if let Err(error) = self
                .queue
                .send(&QueueMessage::CreationRequest(request), None)
                .await
            {
                warn!(
                    component = "creation_scheduler",
                    event = "requeue_failed",
                    account_name = %account.account_name,
                    error = %error,
                );
                continue;
            }

            info!(
                component = "creation_scheduler",
                event = "stalled_creation_requeued",
                account_name = %account.account_name,
                reclaimed = account.provisioning_started_date.is_some(),
            );
            requeued += 1;
        }
        Ok(requeued)
    }
}

/// What the provisioning worker did with a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Registered { account_id: String },
    /// The record is missing, no longer `TO_CREATE`, or already claimed by
    /// another delivery; the message is acknowledged.
    Skipped { status: Option<AccountStatus> },
}

pub struct ProvisioningWorker {
    store: Arc<dyn AccountStore>,
    task: Arc<dyn ExternalTask>,
    clock: Arc<dyn Clock>,
}

impl ProvisioningWorker {
    pub fn new(
        store: Arc<dyn AccountStore>,
        task: Arc<dyn ExternalTask>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, task, clock }
    }

    /// Runs the external creation task for one request.
    ///
    /// The record is claimed with a guarded write before the task starts, so
    /// concurrent deliveries of one request run the sign-up at most once. A
    /// task failure releases the claim, is recorded on the record and is
    /// returned as [`Error::ExternalTask`] so the queue redelivers the message.
    pub async fn handle(&self, request: &AccountRequest) -> Result<ProvisionOutcome> {
        request.validate()?;

        let claim = self
            .store
            .conditional_update(
                &request.account_name,
                &Precondition::status(AccountStatus::ToCreate)
                    .and_absent(TimestampField::ProvisioningStartedDate),
                &AccountMutation::annotate()
                    .with_timestamp(TimestampField::ProvisioningStartedDate, self.clock.now()),
            )
            .await?;
        if !claim.is_applied() {
            let status = self
                .store
                .get(&request.account_name)
                .await?
                .map(|account| account.account_status);
            info!(
                component = "provisioning",
                event = "duplicate_request",
                account_name = %request.account_name,
                status = ?status,
            );
            return Ok(ProvisionOutcome::Skipped { status });
        }

        let reason = match self.task.run(request).await {
            TaskOutcome::Succeeded { output } => match created_account_id(&output) {
                Some(account_id) => {
                    return self.register(request, account_id, password(&output)).await;
                }
                None => "creation task output carries no account id".to_string(),
            },
            TaskOutcome::Failed { reason } => reason,
        };

        warn!(
            component = "provisioning",
            event = "creation_failed",
            account_name = %request.account_name,
            reason = %reason,
        );
        self.store
            .conditional_update(
                &request.account_name,
                &Precondition::status(AccountStatus::ToCreate),
                &AccountMutation::annotate()
                    .with_error_message(reason.clone())
                    .without_timestamp(TimestampField::ProvisioningStartedDate),
            )
            .await?;
        Err(Error::ExternalTask { message: reason })
    }

    async fn register(
        &self,
        request: &AccountRequest,
        account_id: String,
        password: Option<String>,
    ) -> Result<ProvisionOutcome> {
        let mut mutation = AccountMutation::transition(AccountStatus::Created)
            .with_account_id(account_id.clone())
            .with_timestamp(TimestampField::RegistrationDate, self.clock.now());
        if let Some(password) = password {
            mutation = mutation.with_password(password);
        }

        let outcome = self
            .store
            .conditional_update(
                &request.account_name,
                &Precondition::status(AccountStatus::ToCreate),
                &mutation,
            )
            .await?;
        match outcome {
            UpdateOutcome::Applied(_) => {
                info!(
                    component = "provisioning",
                    event = "account_registered",
                    account_name = %request.account_name,
                    account_id = %account_id,
                );
                Ok(ProvisionOutcome::Registered { account_id })
            }
            UpdateOutcome::PreconditionFailed | UpdateOutcome::NotFound => {
                let status = self
                    .store
                    .get(&request.account_name)
                    .await?
                    .map(|account| account.account_status);
                Ok(ProvisionOutcome::Skipped { status })
            }
        }
    }
}

fn created_account_id(output: &Value) -> Option<String> {
    ["account_id", "accountId"]
        .iter()
        .find_map(|key| output.get(key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn password(output: &Value) -> Option<String> {
    output
        .get("password")
        .and_then(Value::as_str)
        .map(str::to_string)
}
