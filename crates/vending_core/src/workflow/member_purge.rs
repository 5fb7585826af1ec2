//! Closes member accounts that vended root accounts created under their own
//! organizations.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::AccountStatus;
use crate::classify::{Failure, Matcher, Rules};
use crate::clock::Clock;
use crate::contract::DEFAULT_MEMBER_ROLE_NAME;
use crate::error::Result;
use crate::provider::{codes, OrganizationsApi, ProviderError, ProviderRole};
use crate::store::{AccountStore, StatusScan};
use crate::workflow::suspension::SweepFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PurgeVerdict {
    NothingToDo,
    Skip,
    Fail,
}

fn list_rules(member_role_name: &str) -> Rules<PurgeVerdict> {
    Rules::new(PurgeVerdict::Fail)
        .rule(
            Matcher::AnyOf(vec![
                Matcher::code(codes::ORGANIZATIONS_NOT_IN_USE),
                Matcher::contains("not in use"),
            ]),
            PurgeVerdict::NothingToDo,
        )
        .rule(
            Matcher::AnyOf(vec![
                Matcher::code(codes::ACCESS_DENIED),
                Matcher::like(format!(
                    "The role * is not authorized to assume the task state's role, arn:aws:iam::*:role/{member_role_name}."
                )),
            ]),
            PurgeVerdict::NothingToDo,
        )
}

fn close_rules() -> Rules<PurgeVerdict> {
    Rules::new(PurgeVerdict::Fail).rule(
        Matcher::AnyOf(vec![
            Matcher::code(codes::TOO_MANY_REQUESTS),
            Matcher::code(codes::ACCOUNT_ALREADY_CLOSED),
        ]),
        PurgeVerdict::Skip,
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPurgeReport {
    pub roots_scanned: usize,
    pub roots_without_organization: usize,
    pub members_closed: usize,
    pub members_skipped: usize,
    pub failures: Vec<SweepFailure>,
}

pub struct MemberPurgeSweep {
    store: Arc<dyn AccountStore>,
    organizations: Arc<dyn OrganizationsApi>,
    clock: Arc<dyn Clock>,
    delay: Duration,
    member_role_name: String,
}

impl MemberPurgeSweep {
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
            member_role_name: DEFAULT_MEMBER_ROLE_NAME.to_string(),
        }
    }

    pub fn with_member_role_name(mut self, member_role_name: impl Into<String>) -> Self {
        self.member_role_name = member_role_name.into();
        self
    }

    pub async fn run(&self) -> Result<MemberPurgeReport> {
        let roots = StatusScan::new(self.store.as_ref(), AccountStatus::Vended)
            .collect_all()
            .await?;

        let mut report = MemberPurgeReport::default();
        for root in roots {
            let Some(root_id) = root.account_id.as_deref() else {
                continue;
            };
            report.roots_scanned += 1;
            if let Err(error) = self.purge_root(root_id, &mut report).await {
                warn!(
                    component = "member_purge",
                    event = "root_failed",
                    account_name = %root.account_name,
                    error = %error,
                );
                report.failures.push(SweepFailure {
                    account_name: root.account_name.clone(),
                    error_message: error.to_string(),
                });
            }
        }

        info!(
            component = "member_purge",
            event = "sweep_completed",
            roots_scanned = report.roots_scanned,
            members_closed = report.members_closed,
            members_skipped = report.members_skipped,
            failures = report.failures.len(),
        );
        Ok(report)
    }

    async fn purge_root(
        &self,
        root_id: &str,
        report: &mut MemberPurgeReport,
    ) -> std::result::Result<(), ProviderError> {
        let role = ProviderRole::member(root_id);
        let members = match self.organizations.list_accounts(&role).await {
            Ok(members) => members,
            Err(error) => {
                return match list_rules(&self.member_role_name).classify(&Failure::from(&error)) {
                    PurgeVerdict::Fail => Err(error),
                    _ => {
                        report.roots_without_organization += 1;
                        Ok(())
                    }
                };
            }
        };

        for member in members
            .iter()
            .filter(|member| member.is_active() && member.id != root_id)
        {
            self.clock.sleep(self.delay).await;
            match self.organizations.close_account(&role, &member.id).await {
                Ok(()) => {
                    info!(
                        component = "member_purge",
                        event = "member_closed",
                        root_account_id = root_id,
                        member_account_id = %member.id,
                    );
                    report.members_closed += 1;
                }
                Err(error) => match close_rules().classify(&Failure::from(&error)) {
                    PurgeVerdict::Fail => return Err(error),
                    _ => report.members_skipped += 1,
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_organization_or_role_means_nothing_to_do() {
        let rules = list_rules(DEFAULT_MEMBER_ROLE_NAME);
        let not_in_use = ProviderError::new(codes::ORGANIZATIONS_NOT_IN_USE, "Your account is not a member of an organization.");
        assert_eq!(rules.classify(&Failure::from(&not_in_use)), PurgeVerdict::NothingToDo);

        let cannot_assume = ProviderError::new(
            "States.TaskFailed",
            "The role arn:aws:iam::1:role/x is not authorized to assume the task state's role, arn:aws:iam::2:role/OVMCrossAccountRole.",
        );
        assert_eq!(rules.classify(&Failure::from(&cannot_assume)), PurgeVerdict::NothingToDo);

        let other = ProviderError::new("ServiceException", "boom");
        assert_eq!(rules.classify(&Failure::from(&other)), PurgeVerdict::Fail);
    }

    #[test]
    fn throttled_or_closed_members_are_skipped() {
        let closed = ProviderError::new(codes::ACCOUNT_ALREADY_CLOSED, "closed");
        assert_eq!(close_rules().classify(&Failure::from(&closed)), PurgeVerdict::Skip);
        let denied = ProviderError::new(codes::ACCESS_DENIED, "denied");
        assert_eq!(close_rules().classify(&Failure::from(&denied)), PurgeVerdict::Fail);
    }
}
