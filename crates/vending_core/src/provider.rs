//! Provider management-plane contract.
//!
//! Every call names the role it runs under: the management organization's
//! role, or the cross-account role inside a member account. Failures are
//! returned as a structured [`ProviderError`] and classified by pattern rules,
//! never by an exhaustive enum.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error codes the workflows have rules for.
pub mod codes {
    pub const DUPLICATE_HANDSHAKE: &str = "DuplicateHandshakeException";
    pub const HANDSHAKE_CONSTRAINT_VIOLATION: &str = "HandshakeConstraintViolationException";
    pub const INVALID_HANDSHAKE_TRANSITION: &str = "InvalidHandshakeTransitionException";
    pub const CHILD_NOT_FOUND: &str = "ChildNotFoundException";
    pub const ACCOUNT_NOT_FOUND: &str = "AccountNotFoundException";
    pub const DUPLICATE_ACCOUNT: &str = "DuplicateAccountException";
    pub const SOURCE_PARENT_NOT_FOUND: &str = "SourceParentNotFoundException";
    pub const ACCOUNT_ALREADY_CLOSED: &str = "AccountAlreadyClosedException";
    pub const TOO_MANY_REQUESTS: &str = "TooManyRequestsException";
    pub const CONSTRAINT_VIOLATION: &str = "ConstraintViolationException";
    pub const CONCURRENT_MODIFICATION: &str = "ConcurrentModificationException";
    pub const THROTTLING: &str = "Throttling";
    pub const THROTTLING_EXCEPTION: &str = "ThrottlingException";
    pub const ORGANIZATIONS_NOT_IN_USE: &str = "AWSOrganizationsNotInUseException";
    pub const ACCESS_DENIED: &str = "AccessDenied";
    pub const TIMEOUT: &str = "Timeout";
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: String,
    pub message: String,
    /// Provider-specific sub-reason, e.g. a constraint violation reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

/// The identity a provider call is made with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderRole {
    /// The central management organization's role.
    Management,
    /// The cross-account role inside the given account.
    Member { account_id: String },
}

impl ProviderRole {
    pub fn member(account_id: impl Into<String>) -> Self {
        Self::Member {
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Management => f.write_str("management"),
            Self::Member { account_id } => write!(f, "member:{account_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// An account listed inside an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMember {
    pub id: String,
    /// Provider status, e.g. `ACTIVE`, `SUSPENDED`, `PENDING_CLOSURE`.
    pub status: String,
}

impl OrganizationMember {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    /// Invites the account behind `email` into the role's organization.
    async fn invite_account(
        &self,
        role: &ProviderRole,
        email: &str,
        notes: &str,
    ) -> Result<Handshake, ProviderError>;

    async fn list_handshakes_for_account(
        &self,
        role: &ProviderRole,
    ) -> Result<Vec<Handshake>, ProviderError>;

    async fn accept_handshake(
        &self,
        role: &ProviderRole,
        handshake_id: &str,
    ) -> Result<(), ProviderError>;

    /// Returns the ids of the account's parents (root or organizational units).
    async fn list_parents(
        &self,
        role: &ProviderRole,
        account_id: &str,
    ) -> Result<Vec<String>, ProviderError>;

    async fn move_account(
        &self,
        role: &ProviderRole,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> Result<(), ProviderError>;

    async fn close_account(&self, role: &ProviderRole, account_id: &str)
        -> Result<(), ProviderError>;

    async fn list_accounts(
        &self,
        role: &ProviderRole,
    ) -> Result<Vec<OrganizationMember>, ProviderError>;
}
