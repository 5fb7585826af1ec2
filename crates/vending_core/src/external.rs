//! Long-running external tasks (browser-automated sign-up and closure).
//!
//! The core only sees terminal success or failure. Timeouts are reported by
//! the adapter as failures and take the same path as unrecognized reasons.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::AccountRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded {
        #[serde(default)]
        output: Value,
    },
    Failed {
        reason: String,
    },
}

impl TaskOutcome {
    pub fn succeeded() -> Self {
        Self::Succeeded {
            output: Value::Null,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ExternalTask: Send + Sync {
    async fn run(&self, request: &AccountRequest) -> TaskOutcome;
}
