mod support;

use support::{epoch, vended, Harness};
use vending_core::provider::{codes, OrganizationMember, ProviderError, ProviderRole};
use vending_core::testing::OrgCall;
use vending_core::workflow::member_purge::MemberPurgeSweep;

fn member(id: &str, status: &str) -> OrganizationMember {
    OrganizationMember {
        id: id.to_string(),
        status: status.to_string(),
    }
}

fn sweep(harness: &Harness) -> MemberPurgeSweep {
    MemberPurgeSweep::new(
        harness.store.clone(),
        harness.organizations.clone(),
        harness.clock.clone(),
        harness.policy.suspension_delay(),
    )
}

#[tokio::test]
async fn closes_active_members_other_than_the_root() {
    let harness = Harness::new([vended("ovm-root", "100000000000", epoch())]);
    harness.organizations.script_list_accounts(Ok(vec![
        member("100000000000", "ACTIVE"),
        member("200000000000", "ACTIVE"),
        member("300000000000", "SUSPENDED"),
        member("400000000000", "ACTIVE"),
    ]));
    harness.organizations.script_close(Ok(()));
    harness.organizations.script_close(Err(ProviderError::new(
        codes::ACCOUNT_ALREADY_CLOSED,
        "closed",
    )));

    let report = sweep(&harness).run().await.expect("sweep");

    assert_eq!(report.roots_scanned, 1);
    assert_eq!(report.members_closed, 1);
    assert_eq!(report.members_skipped, 1);
    assert!(report.failures.is_empty());
    assert_eq!(
        harness.organizations.closed_accounts(),
        ["200000000000", "400000000000"]
    );
    assert!(harness.organizations.calls().iter().all(|call| match call {
        OrgCall::ListAccounts { role } | OrgCall::Close { role, .. } =>
            *role == ProviderRole::member("100000000000"),
        _ => false,
    }));
}

#[tokio::test]
async fn root_without_organization_has_nothing_to_do() {
    let harness = Harness::new([vended("ovm-root", "100000000000", epoch())]);
    harness
        .organizations
        .script_list_accounts(Err(ProviderError::new(
            codes::ORGANIZATIONS_NOT_IN_USE,
            "Your account is not a member of an organization.",
        )));

    let report = sweep(&harness).run().await.expect("sweep");

    assert_eq!(report.roots_without_organization, 1);
    assert!(report.failures.is_empty());
    assert!(harness.organizations.closed_accounts().is_empty());
}

#[tokio::test]
async fn unexpected_close_error_fails_only_that_root() {
    let harness = Harness::new([
        vended("ovm-a", "100000000000", epoch()),
        vended("ovm-b", "500000000000", epoch()),
    ]);
    harness.organizations.script_list_accounts(Ok(vec![
        member("100000000000", "ACTIVE"),
        member("200000000000", "ACTIVE"),
    ]));
    harness.organizations.script_close(Err(ProviderError::new(
        "ServiceException",
        "internal error",
    )));
    harness.organizations.script_list_accounts(Ok(vec![
        member("500000000000", "ACTIVE"),
        member("600000000000", "ACTIVE"),
    ]));

    let report = sweep(&harness).run().await.expect("sweep");

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_name, "ovm-a");
    assert_eq!(report.members_closed, 1);
    assert_eq!(
        harness.organizations.closed_accounts(),
        ["200000000000", "600000000000"]
    );
}
