//! Error types for the account lifecycle domain.

use crate::account::AccountStatus;
use crate::provider::ProviderError;

/// The result type used throughout vending_core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lifecycle operations.
///
/// Contention on a conditional update is not an error; it is reported through
/// [`crate::store::UpdateOutcome::PreconditionFailed`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No record exists under the given key.
    #[error("account not found: {account_name}")]
    NotFound {
        /// The missing key.
        account_name: String,
    },

    /// A plain insert collided with an existing record.
    #[error("account already exists: {account_name}")]
    AlreadyExists {
        /// The colliding key.
        account_name: String,
    },

    /// A status change outside the lifecycle graph was attempted.
    #[error("invalid status transition for {account_name}: {from} -> {to}")]
    InvalidTransition {
        /// The record being mutated.
        account_name: String,
        /// Status the write was guarded on.
        from: AccountStatus,
        /// Requested status.
        to: AccountStatus,
    },

    /// A status change was requested without an expected-status guard.
    #[error("status change to {to} for {account_name} must be guarded by an expected status")]
    UnguardedTransition {
        /// The record being mutated.
        account_name: String,
        /// Requested status.
        to: AccountStatus,
    },

    /// The backing store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Sending to a message queue failed.
    #[error("queue error: {message}")]
    Queue {
        /// Description of the queue failure.
        message: String,
    },

    /// A provider management-plane call failed in a way the caller escalates.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An external long-running task could not be completed.
    #[error("external task failed: {message}")]
    ExternalTask {
        /// Failure reason reported by the task.
        message: String,
    },

    /// Input or persisted data failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// What was invalid.
        message: String,
    },

    /// A serialization round-trip failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(account_name: impl Into<String>) -> Self {
        Self::NotFound {
            account_name: account_name.into(),
        }
    }
}
