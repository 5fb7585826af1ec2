use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use vending_core::external::TaskOutcome;
use vending_core::policy::LifecyclePolicy;
use vending_core::store::memory::InMemoryAccountStore;
use vending_core::store::AccountStore;
use vending_core::testing::{ManualClock, RecordingQueue, ScriptedOrganizations, ScriptedTask};
use vending_core::{Account, AccountStatus, TimestampField};

use crate::services::Services;

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) struct Fixture {
    pub store: Arc<InMemoryAccountStore>,
    pub queue: Arc<RecordingQueue>,
    pub clock: Arc<ManualClock>,
    pub creation_task: Arc<ScriptedTask>,
    pub closure_task: Arc<ScriptedTask>,
    pub organizations: Arc<ScriptedOrganizations>,
    pub services: Services,
}

impl Fixture {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self::with_tasks(
            accounts,
            ScriptedTask::repeating(TaskOutcome::failed("creation task not scripted")),
            ScriptedTask::repeating(TaskOutcome::failed("closure task not scripted")),
        )
    }

    pub fn with_tasks(
        accounts: impl IntoIterator<Item = Account>,
        creation_task: ScriptedTask,
        closure_task: ScriptedTask,
    ) -> Self {
        let store = Arc::new(InMemoryAccountStore::seeded(accounts));
        let queue = Arc::new(RecordingQueue::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let creation_task = Arc::new(creation_task);
        let closure_task = Arc::new(closure_task);
        let organizations = Arc::new(ScriptedOrganizations::new());
        let services = Services {
            store: store.clone(),
            queue: queue.clone(),
            clock: clock.clone(),
            creation_task: creation_task.clone(),
            closure_task: closure_task.clone(),
            organizations: organizations.clone(),
            policy: LifecyclePolicy::default(),
            naming: Default::default(),
            member_role_name: "OVMCrossAccountRole".to_string(),
            graveyard_ou_id: "ou-graveyard".to_string(),
        };
        Self {
            store,
            queue,
            clock,
            creation_task,
            closure_task,
            organizations,
            services,
        }
    }

    pub async fn status_of(&self, account_name: &str) -> AccountStatus {
        self.store
            .require(account_name)
            .await
            .expect("record should exist")
            .account_status
    }
}

pub(crate) fn created(name: &str, account_id: &str) -> Account {
    Account::new(name, format!("{name}@example.com"), AccountStatus::Created)
        .with_account_id(account_id)
}

pub(crate) fn vended(name: &str, account_id: &str) -> Account {
    Account::new(name, format!("{name}@example.com"), AccountStatus::Vended)
        .with_account_id(account_id)
        .with_timestamp(TimestampField::VendingDate, epoch())
}
