use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle status of a managed account.
///
/// `TO_CREATE → CREATED → VENDED → CLOSED | FAILED`, and independently
/// `VENDED → BURIED → BURIED_AND_CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    ToCreate,
    Created,
    Vended,
    Closed,
    Failed,
    Buried,
    BuriedAndClosed,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 7] = [
        Self::ToCreate,
        Self::Created,
        Self::Vended,
        Self::Closed,
        Self::Failed,
        Self::Buried,
        Self::BuriedAndClosed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToCreate => "TO_CREATE",
            Self::Created => "CREATED",
            Self::Vended => "VENDED",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
            Self::Buried => "BURIED",
            Self::BuriedAndClosed => "BURIED_AND_CLOSED",
        }
    }

    /// Returns true when `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: AccountStatus) -> bool {
        matches!(
            (self, next),
            (Self::ToCreate, Self::Created)
                | (Self::Created, Self::Vended)
                | (Self::Vended, Self::Closed)
                | (Self::Vended, Self::Failed)
                | (Self::Vended, Self::Buried)
                | (Self::Buried, Self::BuriedAndClosed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed | Self::BuriedAndClosed)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| Error::validation(format!("unknown account status '{value}'")))
    }
}

/// Timestamp attributes that workflows stamp on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    RequestedDate,
    /// Claim taken by the provisioning worker before it starts the sign-up.
    ProvisioningStartedDate,
    RegistrationDate,
    VendingDate,
    DeletionDate,
    BurialDate,
    BuriedAndCloseDate,
    FailureDate,
}

impl TimestampField {
    pub const ALL: [TimestampField; 8] = [
        Self::RequestedDate,
        Self::ProvisioningStartedDate,
        Self::RegistrationDate,
        Self::VendingDate,
        Self::DeletionDate,
        Self::BurialDate,
        Self::BuriedAndCloseDate,
        Self::FailureDate,
    ];

    /// Attribute name as persisted.
    pub fn attribute_name(self) -> &'static str {
        match self {
            Self::RequestedDate => "requested_date",
            Self::ProvisioningStartedDate => "provisioning_started_date",
            Self::RegistrationDate => "registration_date",
            Self::VendingDate => "vending_date",
            Self::DeletionDate => "deletion_date",
            Self::BurialDate => "burial_date",
            Self::BuriedAndCloseDate => "buried_and_close_date",
            Self::FailureDate => "failure_date",
        }
    }
}

/// A managed account record, keyed by `account_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_name: String,
    pub account_email: String,
    pub account_status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_started_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vending_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burial_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buried_and_close_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Account {
    pub fn new(
        account_name: impl Into<String>,
        account_email: impl Into<String>,
        account_status: AccountStatus,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            account_email: account_email.into(),
            account_status,
            account_id: None,
            password: None,
            requested_date: None,
            provisioning_started_date: None,
            registration_date: None,
            vending_date: None,
            deletion_date: None,
            burial_date: None,
            buried_and_close_date: None,
            failure_date: None,
            error_message: None,
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_timestamp(mut self, field: TimestampField, value: DateTime<Utc>) -> Self {
        self.set_timestamp(field, value);
        self
    }

    pub fn timestamp(&self, field: TimestampField) -> Option<DateTime<Utc>> {
        match field {
            TimestampField::RequestedDate => self.requested_date,
            TimestampField::ProvisioningStartedDate => self.provisioning_started_date,
            TimestampField::RegistrationDate => self.registration_date,
            TimestampField::VendingDate => self.vending_date,
            TimestampField::DeletionDate => self.deletion_date,
            TimestampField::BurialDate => self.burial_date,
            TimestampField::BuriedAndCloseDate => self.buried_and_close_date,
            TimestampField::FailureDate => self.failure_date,
        }
    }

    pub fn set_timestamp(&mut self, field: TimestampField, value: DateTime<Utc>) {
        *self.timestamp_slot(field) = Some(value);
    }

    pub fn clear_timestamp(&mut self, field: TimestampField) {
        *self.timestamp_slot(field) = None;
    }

    fn timestamp_slot(&mut self, field: TimestampField) -> &mut Option<DateTime<Utc>> {
        match field {
            TimestampField::RequestedDate => &mut self.requested_date,
            TimestampField::ProvisioningStartedDate => &mut self.provisioning_started_date,
            TimestampField::RegistrationDate => &mut self.registration_date,
            TimestampField::VendingDate => &mut self.vending_date,
            TimestampField::DeletionDate => &mut self.deletion_date,
            TimestampField::BurialDate => &mut self.burial_date,
            TimestampField::BuriedAndCloseDate => &mut self.buried_and_close_date,
            TimestampField::FailureDate => &mut self.failure_date,
        }
    }
}
