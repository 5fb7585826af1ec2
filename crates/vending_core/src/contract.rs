use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::{Error, Result};
use crate::workflow::decommission::DecommissionTicket;

pub const DEFAULT_MEMBER_ROLE_NAME: &str = "OVMCrossAccountRole";

/// Identity of an account passed between stages and to external tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRequest {
    pub account_name: String,
    pub account_email: String,
}

impl AccountRequest {
    pub fn new(account_name: impl Into<String>, account_email: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_email: account_email.into(),
        }
    }

    pub fn for_account(account: &Account) -> Self {
        Self::new(account.account_name.clone(), account.account_email.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_name.trim().is_empty() {
            return Err(Error::validation("account_name cannot be empty"));
        }
        if !self.account_email.contains('@') {
            return Err(Error::validation(format!(
                "account_email '{}' is not an email address",
                self.account_email
            )));
        }
        Ok(())
    }
}

/// Messages carried on the lifecycle queues. Delivery is at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueMessage {
    CreationRequest(AccountRequest),
    Decommission(DecommissionTicket),
}

/// Time-triggered entry points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledSweep {
    Creation,
    Burial,
    Suspension,
    MemberPurge,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendedAccount {
    pub account_id: String,
    pub cross_account_role: String,
}

pub fn cross_account_role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_request_message_is_tagged() {
        let message = QueueMessage::CreationRequest(AccountRequest::new(
            "ovm-abc",
            "test+abc@example.com",
        ));
        let json = serde_json::to_value(&message).expect("serialize");
        assert_eq!(json["kind"], "creation_request");
        assert_eq!(json["account_name"], "ovm-abc");

        let parsed: QueueMessage = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn validate_rejects_blank_name_and_bad_email() {
        assert!(AccountRequest::new(" ", "a@b.c").validate().is_err());
        assert!(AccountRequest::new("ovm-1", "nope").validate().is_err());
        assert!(AccountRequest::new("ovm-1", "a@b.c").validate().is_ok());
    }

    #[test]
    fn role_arn_uses_account_and_role_name() {
        assert_eq!(
            cross_account_role_arn("123456789012", DEFAULT_MEMBER_ROLE_NAME),
            "arn:aws:iam::123456789012:role/OVMCrossAccountRole"
        );
    }
}
