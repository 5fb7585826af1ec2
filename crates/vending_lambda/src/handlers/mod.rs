//! Event handlers. Each one decodes its event shape and drives a
//! vending_core component through [`crate::services::Services`].

pub mod queue;
pub mod router;
pub mod schedule;
pub mod stream;
pub mod vend;

#[cfg(test)]
pub(crate) mod test_support;

use serde::{Deserialize, Serialize};

/// One record of a batch that must be redelivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Partial batch response for SQS and DynamoDB stream event sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub(crate) fn fail(&mut self, item_identifier: impl Into<String>) {
        self.batch_item_failures.push(BatchItemFailure {
            item_identifier: item_identifier.into(),
        });
    }

    pub fn failed_items(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }
}
