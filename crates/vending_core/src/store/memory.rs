//! In-memory account store.
//!
//! [`InMemoryAccountStore`] keeps records in a `BTreeMap` behind an `RwLock`
//! and records a change notification for every write that changes
//! `account_status`. It backs the unit and integration tests and local runs.
//!
//! ## Limitations
//!
//! - **No durability**: all state is lost when the process exits
//! - **Single-process only**: the notification feed is drained by the caller,
//!   there is no stream delivery

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use super::{
    check_mutation, AccountMutation, AccountStore, ChangeNotification, Page, Precondition,
    QueryOptions, QueryOrder, UpdateOutcome,
};
use crate::account::{Account, AccountStatus};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<String, Account>>,
    notifications: Mutex<Vec<ChangeNotification>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `accounts`, without notifications.
    pub fn seeded(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.account_name.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().map_err(poison_err)?;
        Ok(accounts.values().cloned().collect())
    }

    /// Removes and returns the change notifications recorded so far.
    pub fn drain_notifications(&self) -> Result<Vec<ChangeNotification>> {
        let mut notifications = self.notifications.lock().map_err(poison_err)?;
        Ok(std::mem::take(&mut *notifications))
    }

    fn notify(&self, old_image: Option<Account>, new_image: &Account) -> Result<()> {
        let status_changed = old_image
            .as_ref()
            .map_or(true, |old| old.account_status != new_image.account_status);
        if status_changed {
            self.notifications
                .lock()
                .map_err(poison_err)?
                .push(ChangeNotification {
                    old_image,
                    new_image: new_image.clone(),
                });
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, account_name: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().map_err(poison_err)?;
        Ok(accounts.get(account_name).cloned())
    }

    async fn put(&self, account: &Account) -> Result<()> {
        if self.put_if_absent(account).await? {
            Ok(())
        } else {
            Err(Error::AlreadyExists {
                account_name: account.account_name.clone(),
            })
        }
    }

    async fn put_if_absent(&self, account: &Account) -> Result<bool> {
        {
            let mut accounts = self.accounts.write().map_err(poison_err)?;
            if accounts.contains_key(&account.account_name) {
                return Ok(false);
            }
            accounts.insert(account.account_name.clone(), account.clone());
        }
        self.notify(None, account)?;
        Ok(true)
    }

    async fn conditional_update(
        &self,
        account_name: &str,
        precondition: &Precondition,
        mutation: &AccountMutation,
    ) -> Result<UpdateOutcome> {
        check_mutation(account_name, precondition, mutation)?;

        let (old_image, new_image) = {
            let mut accounts = self.accounts.write().map_err(poison_err)?;
            let Some(account) = accounts.get_mut(account_name) else {
                return Ok(UpdateOutcome::NotFound);
            };
            if !precondition.holds(account) {
                return Ok(UpdateOutcome::PreconditionFailed);
            }
            let old_image = account.clone();
            mutation.apply_to(account);
            (old_image, account.clone())
        };

        self.notify(Some(old_image), &new_image)?;
        Ok(UpdateOutcome::Applied(new_image))
    }

    async fn query_by_status(
        &self,
        status: AccountStatus,
        options: &QueryOptions,
    ) -> Result<Page> {
        let accounts = self.accounts.read().map_err(poison_err)?;
        let cursor = options
            .start_after
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Excluded);

        let matching: Box<dyn Iterator<Item = &Account>> = match options.order {
            QueryOrder::Ascending => Box::new(
                accounts
                    .range::<str, _>((cursor, Bound::Unbounded))
                    .map(|(_, account)| account)
                    .filter(|account| account.account_status == status),
            ),
            QueryOrder::Descending => Box::new(
                accounts
                    .range::<str, _>((Bound::Unbounded, cursor))
                    .rev()
                    .map(|(_, account)| account)
                    .filter(|account| account.account_status == status),
            ),
        };

        let limit = options.limit.unwrap_or(usize::MAX);
        let mut matching = matching.peekable();
        let mut items = Vec::new();
        while items.len() < limit {
            match matching.next() {
                Some(account) => items.push(account.clone()),
                None => break,
            }
        }

        let next = if matching.peek().is_some() {
            items.last().map(|account| account.account_name.clone())
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn count_by_status(&self, status: AccountStatus) -> Result<usize> {
        let accounts = self.accounts.read().map_err(poison_err)?;
        Ok(accounts
            .values()
            .filter(|account| account.account_status == status)
            .count())
    }
}
