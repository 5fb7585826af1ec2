//! Final closure of buried accounts through the management organization.
//!
//! Close calls are serial with a fixed delay before each one. Provider rate
//! and quota limits end the run early without marking anything; the next
//! scheduled run picks up where this one stopped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::account::{AccountStatus, TimestampField};
use crate::classify::{Failure, Matcher, Rules};
use crate::clock::Clock;
use crate::error::Result;
use crate::provider::{codes, OrganizationsApi, ProviderError, ProviderRole};
use crate::store::{AccountMutation, AccountStore, Precondition, StatusScan};
use crate::workflow::MarkResult;

pub const CLOSE_ACCOUNT_REQUESTS_LIMIT_EXCEEDED: &str = "CloseAccountRequestsLimitExceeded";
pub const CLOSE_ACCOUNT_QUOTA_EXCEEDED: &str = "CloseAccountQuotaExceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseVerdict {
    AlreadyClosed,
    /// Rate or quota limit; stop the run successfully.
    SoftStop,
    HardFailure,
}

pub fn close_rules() -> Rules<CloseVerdict> {
    let rate_limited = Matcher::AnyOf(vec![
        Matcher::reason(CLOSE_ACCOUNT_REQUESTS_LIMIT_EXCEEDED),
        Matcher::reason(CLOSE_ACCOUNT_QUOTA_EXCEEDED),
        Matcher::contains("close concurrently"),
        Matcher::like("*in a 30 day period*"),
    ]);

    let transient = Matcher::AnyOf(vec![
        Matcher::code(codes::TOO_MANY_REQUESTS),
        Matcher::code(codes::CONCURRENT_MODIFICATION),
        Matcher::code(codes::THROTTLING),
        Matcher::code(codes::THROTTLING_EXCEPTION),
    ]);

    Rules::new(CloseVerdict::HardFailure)
        .rule(Matcher::code(codes::ACCOUNT_ALREADY_CLOSED), CloseVerdict::AlreadyClosed)
        .rule(transient, CloseVerdict::SoftStop)
        .rule(
            Matcher::AllOf(vec![
                Matcher::code(codes::CONSTRAINT_VIOLATION),
                rate_limited,
            ]),
            CloseVerdict::SoftStop,
        )
}

pub fn classify_close_failure(error: &ProviderError) -> CloseVerdict {
    close_rules().classify(&Failure::from(error))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub account_name: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionReport {
    pub closed: usize,
    pub already_closed: usize,
    /// Marks that found `buried_and_close_date` already set.
    pub already_marked: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_stop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SweepFailure>,
}

impl SuspensionReport {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct SuspensionSweeper {
    store: Arc<dyn AccountStore>,
    organizations: Arc<dyn OrganizationsApi>,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

impl SuspensionSweeper {
    pub fn new(
        store: Arc<dyn AccountStore>,
        organizations: Arc<dyn OrganizationsApi>,
        clock: Arc<dyn Clock>,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            organizations,
            clock,
            delay,
        }
    }

    pub async fn run(&self) -> Result<SuspensionReport> {
        let buried = StatusScan::new(self.store.as_ref(), AccountStatus::Buried)
            .collect_all()
            .await?;

        let mut report = SuspensionReport::default();
        for account in buried {
            if account.failure_date.is_some() {
                report.skipped += 1;
                continue;
            }
            let Some(account_id) = account.account_id.as_deref() else {
                warn!(
                    component = "suspension",
                    event = "missing_account_id",
                    account_name = %account.account_name,
                );
                report.skipped += 1;
                continue;
            };

            self.clock.sleep(self.delay).await;
            match self
                .organizations
                .close_account(&ProviderRole::Management, account_id)
                .await
            {
                Ok(()) => report.closed += 1,
                Err(failure) => match classify_close_failure(&failure) {
                    CloseVerdict::AlreadyClosed => report.already_closed += 1,
                    CloseVerdict::SoftStop => {
                        info!(
                            component = "suspension",
                            event = "soft_stop",
                            account_name = %account.account_name,
                            error = %failure,
                        );
                        report.soft_stop = Some(failure.to_string());
                        break;
                    }
                    CloseVerdict::HardFailure => {
                        let error_message = failure.to_string();
                        error!(
                            component = "suspension",
                            event = "close_failed",
                            account_name = %account.account_name,
                            error = %error_message,
                        );
                        self.store
                            .conditional_update(
                                &account.account_name,
                                &Precondition::status(AccountStatus::Buried),
                                &AccountMutation::annotate()
                                    .with_error_message(error_message.clone())
                                    .with_timestamp(TimestampField::FailureDate, self.clock.now()),
                            )
                            .await?;
                        report.failure = Some(SweepFailure {
                            account_name: account.account_name.clone(),
                            error_message,
                        });
                        break;
                    }
                },
            }

            if self.mark_suspended(&account.account_name).await? == MarkResult::AlreadyApplied {
                report.already_marked += 1;
            }
        }

        info!(
            component = "suspension",
            event = "sweep_completed",
            closed = report.closed,
            already_closed = report.already_closed,
            soft_stopped = report.soft_stop.is_some(),
            failed = report.failure.is_some(),
        );
        Ok(report)
    }

    /// `BURIED → BURIED_AND_CLOSED`, guarded on the close date being absent.
    pub async fn mark_suspended(&self, account_name: &str) -> Result<MarkResult> {
        let outcome = self
            .store
            .conditional_update(
                account_name,
                &Precondition::status(AccountStatus::Buried)
                    .and_absent(TimestampField::BuriedAndCloseDate),
                &AccountMutation::transition(AccountStatus::BuriedAndClosed)
                    .with_timestamp(TimestampField::BuriedAndCloseDate, self.clock.now()),
            )
            .await?;
        Ok(MarkResult::from(&outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_and_quota_limits_soft_stop() {
        let throttled = ProviderError::new(codes::TOO_MANY_REQUESTS, "Too many requests");
        assert_eq!(classify_close_failure(&throttled), CloseVerdict::SoftStop);

        let quota = ProviderError::new(
            codes::CONSTRAINT_VIOLATION,
            "You have exceeded close account quota",
        )
        .with_reason(CLOSE_ACCOUNT_QUOTA_EXCEEDED);
        assert_eq!(classify_close_failure(&quota), CloseVerdict::SoftStop);

        let concurrent = ProviderError::new(
            codes::CONSTRAINT_VIOLATION,
            "Exceeded the number of member accounts you can close concurrently.",
        );
        assert_eq!(classify_close_failure(&concurrent), CloseVerdict::SoftStop);
    }

    #[test]
    fn throttling_and_concurrent_modification_soft_stop() {
        for code in [
            codes::CONCURRENT_MODIFICATION,
            codes::THROTTLING,
            codes::THROTTLING_EXCEPTION,
        ] {
            let error = ProviderError::new(code, "Rate exceeded");
            assert_eq!(classify_close_failure(&error), CloseVerdict::SoftStop, "{code}");
        }
    }

    #[test]
    fn other_constraint_violations_are_hard_failures() {
        let other = ProviderError::new(codes::CONSTRAINT_VIOLATION, "Member account is the master")
            .with_reason("MasterAccountMissingContactInfo");
        assert_eq!(classify_close_failure(&other), CloseVerdict::HardFailure);

        let closed = ProviderError::new(codes::ACCOUNT_ALREADY_CLOSED, "closed");
        assert_eq!(classify_close_failure(&closed), CloseVerdict::AlreadyClosed);
    }
}
