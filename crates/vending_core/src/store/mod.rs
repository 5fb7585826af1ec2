//! Durable account records.
//!
//! The [`AccountStore`] trait is the only shared mutable resource in the
//! system. Every status change goes through
//! [`AccountStore::conditional_update`], which applies a mutation only while
//! its [`Precondition`] still holds at write time.
//!
//! ## Design Principles
//!
//! - **Conditional writes only**: status changes must name the expected prior
//!   status and must follow an edge of the lifecycle graph
//! - **Contention is data, not an error**: a failed guard is reported as
//!   [`UpdateOutcome::PreconditionFailed`]
//! - **Secondary index by status**: counts and first-match lookups read pages
//!   keyed by `account_status`

pub mod memory;

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStatus, TimestampField};
use crate::error::{Error, Result};

/// Guard evaluated atomically with a conditional update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub expected_status: Option<AccountStatus>,
    /// Timestamp fields that must not be set yet.
    pub absent: Vec<TimestampField>,
}

impl Precondition {
    pub fn status(expected: AccountStatus) -> Self {
        Self {
            expected_status: Some(expected),
            absent: Vec::new(),
        }
    }

    pub fn absent(field: TimestampField) -> Self {
        Self {
            expected_status: None,
            absent: vec![field],
        }
    }

    pub fn and_absent(mut self, field: TimestampField) -> Self {
        if !self.absent.contains(&field) {
            self.absent.push(field);
        }
        self
    }

    pub fn holds(&self, account: &Account) -> bool {
        let status_matches = self
            .expected_status
            .map_or(true, |expected| account.account_status == expected);
        status_matches
            && self
                .absent
                .iter()
                .all(|field| account.timestamp(*field).is_none())
    }
}

/// Attributes written by a conditional update. Unset parts are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMutation {
    pub status: Option<AccountStatus>,
    pub account_id: Option<String>,
    pub password: Option<String>,
    pub timestamps: Vec<(TimestampField, DateTime<Utc>)>,
    /// Timestamp fields removed from the record.
    pub cleared: Vec<TimestampField>,
    pub error_message: Option<String>,
}

impl AccountMutation {
    pub fn transition(to: AccountStatus) -> Self {
        Self {
            status: Some(to),
            ..Self::default()
        }
    }

    /// A mutation that leaves the status alone.
    pub fn annotate() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self, field: TimestampField, at: DateTime<Utc>) -> Self {
        self.timestamps.push((field, at));
        self
    }

    pub fn without_timestamp(mut self, field: TimestampField) -> Self {
        self.cleared.push(field);
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn apply_to(&self, account: &mut Account) {
        if let Some(status) = self.status {
            account.account_status = status;
        }
        if let Some(account_id) = &self.account_id {
            account.account_id = Some(account_id.clone());
        }
        if let Some(password) = &self.password {
            account.password = Some(password.clone());
        }
        for field in &self.cleared {
            account.clear_timestamp(*field);
        }
        for (field, at) in &self.timestamps {
            account.set_timestamp(*field, *at);
        }
        if let Some(message) = &self.error_message {
            account.error_message = Some(message.clone());
        }
    }
}

/// Rejects status changes that are unguarded or off the lifecycle graph.
///
/// Stores call this before attempting the write; it does not look at stored
/// data.
pub fn check_mutation(
    account_name: &str,
    precondition: &Precondition,
    mutation: &AccountMutation,
) -> Result<()> {
    let Some(to) = mutation.status else {
        return Ok(());
    };
    let Some(from) = precondition.expected_status else {
        return Err(Error::UnguardedTransition {
            account_name: account_name.to_string(),
            to,
        });
    };
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            account_name: account_name.to_string(),
            from,
            to,
        });
    }
    Ok(())
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The mutation was applied; carries the new image.
    Applied(Account),
    /// Another writer got there first; nothing was written.
    PreconditionFailed,
    NotFound,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub order: QueryOrder,
    /// Resume after the record with this key.
    pub start_after: Option<String>,
}

impl QueryOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// One page of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Account>,
    /// Cursor for the next page, absent when the query is exhausted.
    pub next: Option<String>,
}

/// Emitted for every successful write that changes `account_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub old_image: Option<Account>,
    pub new_image: Account,
}

impl ChangeNotification {
    pub fn old_status(&self) -> Option<AccountStatus> {
        self.old_image.as_ref().map(|account| account.account_status)
    }

    pub fn new_status(&self) -> AccountStatus {
        self.new_image.account_status
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, account_name: &str) -> Result<Option<Account>>;

    /// Inserts a new record; fails with [`Error::AlreadyExists`] on collision.
    async fn put(&self, account: &Account) -> Result<()>;

    /// Inserts unless a record with the same key exists. Returns whether it
    /// was inserted.
    async fn put_if_absent(&self, account: &Account) -> Result<bool>;

    async fn conditional_update(
        &self,
        account_name: &str,
        precondition: &Precondition,
        mutation: &AccountMutation,
    ) -> Result<UpdateOutcome>;

    async fn query_by_status(&self, status: AccountStatus, options: &QueryOptions)
        -> Result<Page>;

    async fn count_by_status(&self, status: AccountStatus) -> Result<usize>;

    async fn require(&self, account_name: &str) -> Result<Account> {
        self.get(account_name)
            .await?
            .ok_or_else(|| Error::not_found(account_name))
    }
}

/// Lazy walk over every record with a given status.
///
/// Pages are fetched on demand. [`StatusScan::cursor`] names the last record
/// yielded, and a new scan built with [`StatusScan::resume_after`] continues
/// from there.
pub struct StatusScan<'a, S: AccountStore + ?Sized> {
    store: &'a S,
    status: AccountStatus,
    page_size: usize,
    order: QueryOrder,
    next_page: Option<String>,
    last_yielded: Option<String>,
    buffer: VecDeque<Account>,
    exhausted: bool,
}

impl<'a, S: AccountStore + ?Sized> StatusScan<'a, S> {
    pub fn new(store: &'a S, status: AccountStatus) -> Self {
        Self {
            store,
            status,
            page_size: 100,
            order: QueryOrder::Ascending,
            next_page: None,
            last_yielded: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn order(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn resume_after(mut self, cursor: impl Into<String>) -> Self {
        let cursor = cursor.into();
        self.next_page = Some(cursor.clone());
        self.last_yielded = Some(cursor);
        self
    }

    pub fn cursor(&self) -> Option<&str> {
        self.last_yielded.as_deref()
    }

    pub async fn next(&mut self) -> Result<Option<Account>> {
        if self.buffer.is_empty() && !self.exhausted {
            let options = QueryOptions {
                limit: Some(self.page_size),
                order: self.order,
                start_after: self.next_page.clone(),
            };
            let page = self.store.query_by_status(self.status, &options).await?;
            self.exhausted = page.next.is_none();
            self.next_page = page.next;
            self.buffer.extend(page.items);
        }

        let next = self.buffer.pop_front();
        if let Some(account) = &next {
            self.last_yielded = Some(account.account_name.clone());
        }
        Ok(next)
    }

    pub async fn collect_all(mut self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        while let Some(account) = self.next().await? {
            accounts.push(account);
        }
        Ok(accounts)
    }
}
