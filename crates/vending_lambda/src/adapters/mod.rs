//! AWS-backed implementations of the vending_core ports.

pub mod clock;
pub mod dynamo_store;
pub mod lambda_task;
pub mod organizations;
pub mod sqs_queue;
