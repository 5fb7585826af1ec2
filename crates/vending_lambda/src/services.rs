//! Port wiring shared by every handler.

use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use vending_core::clock::Clock;
use vending_core::creation::{AccountNaming, CreationScheduler, ProvisioningWorker};
use vending_core::external::ExternalTask;
use vending_core::policy::LifecyclePolicy;
use vending_core::provider::OrganizationsApi;
use vending_core::queue::MessageQueue;
use vending_core::store::AccountStore;
use vending_core::vending::VendingAllocator;
use vending_core::workflow::burial::{BurialSweep, BurialWorkflow};
use vending_core::workflow::decommission::DecommissionRunner;
use vending_core::workflow::member_purge::MemberPurgeSweep;
use vending_core::workflow::suspension::SuspensionSweeper;

use crate::adapters::clock::SystemClock;
use crate::adapters::dynamo_store::DynamoAccountStore;
use crate::adapters::lambda_task::LambdaTask;
use crate::adapters::organizations::AssumedRoleOrganizations;
use crate::adapters::sqs_queue::SqsMessageQueue;
use crate::config::RuntimeConfig;

/// Longest in-process wait a decommission run sleeps through before it is
/// parked on the workflow queue.
pub const DECOMMISSION_WAIT_BUDGET: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn AccountStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub clock: Arc<dyn Clock>,
    pub creation_task: Arc<dyn ExternalTask>,
    pub closure_task: Arc<dyn ExternalTask>,
    pub organizations: Arc<dyn OrganizationsApi>,
    pub policy: LifecyclePolicy,
    pub naming: AccountNaming,
    pub member_role_name: String,
    pub graveyard_ou_id: String,
}

impl Services {
    pub fn from_config(sdk_config: &SdkConfig, config: &RuntimeConfig) -> Self {
        let lambda = aws_sdk_lambda::Client::new(sdk_config);
        Self {
            store: Arc::new(DynamoAccountStore::new(
                aws_sdk_dynamodb::Client::new(sdk_config),
                &config.account_table,
                &config.status_index,
            )),
            queue: Arc::new(SqsMessageQueue::new(
                aws_sdk_sqs::Client::new(sdk_config),
                &config.creation_queue_url,
                &config.workflow_queue_url,
            )),
            clock: Arc::new(SystemClock),
            creation_task: Arc::new(LambdaTask::new(
                lambda.clone(),
                &config.creation_task_function,
                config.external_task_timeout,
            )),
            closure_task: Arc::new(LambdaTask::new(
                lambda,
                &config.closure_task_function,
                config.external_task_timeout,
            )),
            organizations: Arc::new(AssumedRoleOrganizations::new(
                sdk_config,
                &config.management_role_arn,
                &config.member_role_name,
            )),
            policy: config.policy.clone(),
            naming: config.naming.clone(),
            member_role_name: config.member_role_name.clone(),
            graveyard_ou_id: config.graveyard_ou_id.clone(),
        }
    }

    pub fn allocator(&self) -> VendingAllocator {
        VendingAllocator::new(self.store.clone(), self.clock.clone(), &self.policy)
            .with_member_role_name(&self.member_role_name)
    }

    pub fn creation_scheduler(&self) -> CreationScheduler {
        CreationScheduler::new(
            self.store.clone(),
            self.queue.clone(),
            self.clock.clone(),
            self.policy.clone(),
        )
        .with_naming(self.naming.clone())
    }

    pub fn provisioning_worker(&self) -> ProvisioningWorker {
        ProvisioningWorker::new(
            self.store.clone(),
            self.creation_task.clone(),
            self.clock.clone(),
        )
    }

    pub fn decommission_runner(&self) -> DecommissionRunner {
        DecommissionRunner::new(
            self.store.clone(),
            self.closure_task.clone(),
            self.clock.clone(),
            self.policy.clone(),
        )
        .with_wait_budget(DECOMMISSION_WAIT_BUDGET)
    }

    pub fn burial_sweep(&self) -> BurialSweep {
        let workflow = BurialWorkflow::new(
            self.store.clone(),
            self.organizations.clone(),
            self.clock.clone(),
            self.policy.clone(),
            &self.graveyard_ou_id,
        );
        BurialSweep::new(
            self.store.clone(),
            workflow,
            self.clock.clone(),
            self.policy.grace_period(),
        )
    }

    pub fn suspension_sweeper(&self) -> SuspensionSweeper {
        SuspensionSweeper::new(
            self.store.clone(),
            self.organizations.clone(),
            self.clock.clone(),
            self.policy.suspension_delay(),
        )
    }

    pub fn member_purge(&self) -> MemberPurgeSweep {
        MemberPurgeSweep::new(
            self.store.clone(),
            self.organizations.clone(),
            self.clock.clone(),
            self.policy.suspension_delay(),
        )
        .with_member_role_name(&self.member_role_name)
    }
}
