use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_TARGET_POOL_SIZE: usize = 10;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SUSPENSION_DELAY_SECS: u64 = 20;

/// Tunables shared by the lifecycle components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    #[serde(default = "default_target_pool_size")]
    pub target_pool_size: usize,
    /// Usable window a vended account gets before teardown starts.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default)]
    pub closure_retry: RetryPolicy,
    #[serde(default = "default_vend_max_attempts")]
    pub vend_max_attempts: u32,
    #[serde(default = "default_vend_candidate_page")]
    pub vend_candidate_page: usize,
    #[serde(default = "default_parent_probe_attempts")]
    pub parent_probe_attempts: u32,
    #[serde(default = "default_parent_probe_delay_secs")]
    pub parent_probe_delay_secs: u64,
    #[serde(default = "default_max_move_attempts")]
    pub max_move_attempts: u32,
    /// Fixed delay before each close call in a sweep.
    #[serde(default = "default_suspension_delay_secs")]
    pub suspension_delay_secs: u64,
    /// Age after which a `TO_CREATE` record is re-enqueued.
    #[serde(default = "default_stalled_creation_secs")]
    pub stalled_creation_secs: u64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            target_pool_size: default_target_pool_size(),
            grace_period_secs: default_grace_period_secs(),
            closure_retry: RetryPolicy::default(),
            vend_max_attempts: default_vend_max_attempts(),
            vend_candidate_page: default_vend_candidate_page(),
            parent_probe_attempts: default_parent_probe_attempts(),
            parent_probe_delay_secs: default_parent_probe_delay_secs(),
            max_move_attempts: default_max_move_attempts(),
            suspension_delay_secs: default_suspension_delay_secs(),
            stalled_creation_secs: default_stalled_creation_secs(),
        }
    }
}

impl LifecyclePolicy {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn parent_probe_delay(&self) -> Duration {
        Duration::from_secs(self.parent_probe_delay_secs)
    }

    pub fn suspension_delay(&self) -> Duration {
        Duration::from_secs(self.suspension_delay_secs)
    }

    pub fn stalled_creation_after(&self) -> Duration {
        Duration::from_secs(self.stalled_creation_secs)
    }
}

pub fn default_target_pool_size() -> usize {
    DEFAULT_TARGET_POOL_SIZE
}

pub fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

pub fn default_vend_max_attempts() -> u32 {
    5
}

pub fn default_vend_candidate_page() -> usize {
    25
}

pub fn default_parent_probe_attempts() -> u32 {
    5
}

pub fn default_parent_probe_delay_secs() -> u64 {
    5
}

pub fn default_max_move_attempts() -> u32 {
    3
}

pub fn default_suspension_delay_secs() -> u64 {
    DEFAULT_SUSPENSION_DELAY_SECS
}

pub fn default_stalled_creation_secs() -> u64 {
    6 * 60 * 60
}
