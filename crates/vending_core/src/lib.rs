//! Account lifecycle domain primitives.
//!
//! This crate owns the lifecycle state model, the conditional-update store
//! contract, vending, creation scheduling and the decommission, burial,
//! suspension and member-purge workflows. It intentionally excludes AWS SDK
//! and Lambda runtime concerns; those live in `vending_lambda`.

pub mod account;
pub mod classify;
pub mod clock;
pub mod contract;
pub mod creation;
pub mod error;
pub mod external;
pub mod policy;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod store;
pub mod vending;
pub mod workflow;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use account::{Account, AccountStatus, TimestampField};
pub use error::{Error, Result};
