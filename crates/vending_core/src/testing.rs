//! Scripted fakes for the lifecycle ports.
//!
//! Enabled by the default `test-helpers` feature so integration tests and the
//! lambda crate's tests can share them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{saturating_add, Clock};
use crate::contract::{AccountRequest, QueueMessage};
use crate::error::{Error, Result};
use crate::external::{ExternalTask, TaskOutcome};
use crate::provider::{Handshake, OrganizationMember, OrganizationsApi, ProviderError, ProviderRole};
use crate::queue::MessageQueue;

/// A clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now = saturating_add(*now, duration);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = at;
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock lock").clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("clock lock").push(duration);
        self.advance(duration);
    }
}

/// External task that replays scripted outcomes, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedTask {
    outcomes: Mutex<VecDeque<TaskOutcome>>,
    fallback: TaskOutcome,
    calls: Mutex<Vec<AccountRequest>>,
}

impl ScriptedTask {
    pub fn new(outcomes: impl IntoIterator<Item = TaskOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback: TaskOutcome::failed("no scripted outcome left"),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(outcome: TaskOutcome) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AccountRequest> {
        self.calls.lock().expect("task lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("task lock").len()
    }
}

#[async_trait]
impl ExternalTask for ScriptedTask {
    async fn run(&self, request: &AccountRequest) -> TaskOutcome {
        self.calls.lock().expect("task lock").push(request.clone());
        self.outcomes
            .lock()
            .expect("task lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Queue that records what was sent; can be told to fail the next sends.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    sent: Mutex<Vec<(QueueMessage, Option<Duration>)>>,
    failures_left: Mutex<usize>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        *self.failures_left.lock().expect("queue lock") = count;
    }

    pub fn sent(&self) -> Vec<(QueueMessage, Option<Duration>)> {
        self.sent.lock().expect("queue lock").clone()
    }

    pub fn messages(&self) -> Vec<QueueMessage> {
        self.sent().into_iter().map(|(message, _)| message).collect()
    }
}

#[async_trait]
impl MessageQueue for RecordingQueue {
    async fn send(&self, message: &QueueMessage, delay: Option<Duration>) -> Result<()> {
        {
            let mut failures_left = self.failures_left.lock().expect("queue lock");
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(Error::queue("scripted send failure"));
            }
        }
        self.sent
            .lock()
            .expect("queue lock")
            .push((message.clone(), delay));
        Ok(())
    }
}

/// A provider call observed by [`ScriptedOrganizations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgCall {
    Invite { role: ProviderRole, email: String },
    ListHandshakes { role: ProviderRole },
    Accept { role: ProviderRole, handshake_id: String },
    ListParents { role: ProviderRole, account_id: String },
    Move {
        role: ProviderRole,
        account_id: String,
        source_parent_id: String,
        destination_parent_id: String,
    },
    Close { role: ProviderRole, account_id: String },
    ListAccounts { role: ProviderRole },
}

#[derive(Debug, Default)]
struct OrgScript {
    invites: VecDeque<std::result::Result<Handshake, ProviderError>>,
    handshakes: VecDeque<std::result::Result<Vec<Handshake>, ProviderError>>,
    accepts: VecDeque<std::result::Result<(), ProviderError>>,
    parent_lookups: VecDeque<std::result::Result<Vec<String>, ProviderError>>,
    moves: VecDeque<std::result::Result<(), ProviderError>>,
    closes: VecDeque<std::result::Result<(), ProviderError>>,
    account_lists: VecDeque<std::result::Result<Vec<OrganizationMember>, ProviderError>>,
    parents: HashMap<String, String>,
    calls: Vec<OrgCall>,
}

/// Organizations fake.
///
/// Each call pops the next scripted result for its method. Unscripted calls
/// succeed: parents come from a simulated hierarchy that successful moves
/// update, and accounts default to the `root_parent_id` root.
#[derive(Debug)]
pub struct ScriptedOrganizations {
    script: Mutex<OrgScript>,
    root_parent_id: String,
}

impl Default for ScriptedOrganizations {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOrganizations {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(OrgScript::default()),
            root_parent_id: "r-root".to_string(),
        }
    }

    pub fn with_parent(self, account_id: &str, parent_id: &str) -> Self {
        self.lock()
            .parents
            .insert(account_id.to_string(), parent_id.to_string());
        self
    }

    pub fn script_invite(&self, result: std::result::Result<Handshake, ProviderError>) {
        self.lock().invites.push_back(result);
    }

    pub fn script_list_handshakes(
        &self,
        result: std::result::Result<Vec<Handshake>, ProviderError>,
    ) {
        self.lock().handshakes.push_back(result);
    }

    pub fn script_accept(&self, result: std::result::Result<(), ProviderError>) {
        self.lock().accepts.push_back(result);
    }

    pub fn script_list_parents(&self, result: std::result::Result<Vec<String>, ProviderError>) {
        self.lock().parent_lookups.push_back(result);
    }

    pub fn script_move(&self, result: std::result::Result<(), ProviderError>) {
        self.lock().moves.push_back(result);
    }

    pub fn script_close(&self, result: std::result::Result<(), ProviderError>) {
        self.lock().closes.push_back(result);
    }

    pub fn script_list_accounts(
        &self,
        result: std::result::Result<Vec<OrganizationMember>, ProviderError>,
    ) {
        self.lock().account_lists.push_back(result);
    }

    pub fn calls(&self) -> Vec<OrgCall> {
        self.lock().calls.clone()
    }

    pub fn parent_of(&self, account_id: &str) -> String {
        self.lock()
            .parents
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| self.root_parent_id.clone())
    }

    pub fn closed_accounts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                OrgCall::Close { account_id, .. } => Some(account_id),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OrgScript> {
        self.script.lock().expect("organizations lock")
    }
}

#[async_trait]
impl OrganizationsApi for ScriptedOrganizations {
    async fn invite_account(
        &self,
        role: &ProviderRole,
        email: &str,
        _notes: &str,
    ) -> std::result::Result<Handshake, ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::Invite {
            role: role.clone(),
            email: email.to_string(),
        });
        script.invites.pop_front().unwrap_or_else(|| {
            Ok(Handshake {
                id: format!("h-{email}"),
                state: Some("OPEN".to_string()),
            })
        })
    }

    async fn list_handshakes_for_account(
        &self,
        role: &ProviderRole,
    ) -> std::result::Result<Vec<Handshake>, ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::ListHandshakes { role: role.clone() });
        script.handshakes.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn accept_handshake(
        &self,
        role: &ProviderRole,
        handshake_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::Accept {
            role: role.clone(),
            handshake_id: handshake_id.to_string(),
        });
        script.accepts.pop_front().unwrap_or(Ok(()))
    }

    async fn list_parents(
        &self,
        role: &ProviderRole,
        account_id: &str,
    ) -> std::result::Result<Vec<String>, ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::ListParents {
            role: role.clone(),
            account_id: account_id.to_string(),
        });
        if let Some(result) = script.parent_lookups.pop_front() {
            return result;
        }
        let parent = script
            .parents
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| self.root_parent_id.clone());
        Ok(vec![parent])
    }

    async fn move_account(
        &self,
        role: &ProviderRole,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::Move {
            role: role.clone(),
            account_id: account_id.to_string(),
            source_parent_id: source_parent_id.to_string(),
            destination_parent_id: destination_parent_id.to_string(),
        });
        let result = script.moves.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script
                .parents
                .insert(account_id.to_string(), destination_parent_id.to_string());
        }
        result
    }

    async fn close_account(
        &self,
        role: &ProviderRole,
        account_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::Close {
            role: role.clone(),
            account_id: account_id.to_string(),
        });
        script.closes.pop_front().unwrap_or(Ok(()))
    }

    async fn list_accounts(
        &self,
        role: &ProviderRole,
    ) -> std::result::Result<Vec<OrganizationMember>, ProviderError> {
        let mut script = self.lock();
        script.calls.push(OrgCall::ListAccounts { role: role.clone() });
        script.account_lists.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
