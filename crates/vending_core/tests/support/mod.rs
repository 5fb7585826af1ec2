#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use vending_core::policy::LifecyclePolicy;
use vending_core::retry::RetryPolicy;
use vending_core::store::memory::InMemoryAccountStore;
use vending_core::testing::{ManualClock, RecordingQueue, ScriptedOrganizations};
use vending_core::{Account, AccountStatus, TimestampField};

pub const GRAVEYARD_OU: &str = "ou-graveyard";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Shared ports for one scenario.
pub struct Harness {
    pub store: Arc<InMemoryAccountStore>,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<RecordingQueue>,
    pub organizations: Arc<ScriptedOrganizations>,
    pub policy: LifecyclePolicy,
}

impl Harness {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            store: Arc::new(InMemoryAccountStore::seeded(accounts)),
            clock: Arc::new(ManualClock::new(epoch())),
            queue: Arc::new(RecordingQueue::new()),
            organizations: Arc::new(ScriptedOrganizations::new()),
            policy: test_policy(),
        }
    }

    pub fn with_organizations(mut self, organizations: ScriptedOrganizations) -> Self {
        self.organizations = Arc::new(organizations);
        self
    }

    pub async fn status_of(&self, account_name: &str) -> AccountStatus {
        self.record(account_name).await.account_status
    }

    pub async fn record(&self, account_name: &str) -> Account {
        use vending_core::store::AccountStore;
        self.store
            .require(account_name)
            .await
            .expect("record should exist")
    }
}

pub fn test_policy() -> LifecyclePolicy {
    LifecyclePolicy {
        target_pool_size: 10,
        grace_period_secs: 24 * 60 * 60,
        closure_retry: RetryPolicy {
            interval_secs: 3 * 60 * 60,
            backoff_rate: 1.5,
            max_attempts: 4,
            max_delay_secs: 24 * 60 * 60,
        },
        ..LifecyclePolicy::default()
    }
}

pub fn created(name: &str, account_id: &str) -> Account {
    Account::new(name, email_for(name), AccountStatus::Created).with_account_id(account_id)
}

pub fn vended(name: &str, account_id: &str, vended_at: DateTime<Utc>) -> Account {
    Account::new(name, email_for(name), AccountStatus::Vended)
        .with_account_id(account_id)
        .with_timestamp(TimestampField::VendingDate, vended_at)
}

pub fn buried(name: &str, account_id: &str) -> Account {
    Account::new(name, email_for(name), AccountStatus::Buried)
        .with_account_id(account_id)
        .with_timestamp(TimestampField::BurialDate, epoch())
}

pub fn email_for(name: &str) -> String {
    format!("test+{name}@example.com")
}

pub fn hours(count: u64) -> Duration {
    Duration::from_secs(count * 60 * 60)
}
