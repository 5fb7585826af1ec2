//! External tasks run as synchronously invoked Lambda functions.
//!
//! The function receives `{"account_name", "account_email"}` and answers with
//! a JSON object. A function error, an `{"error": ..}` / `{"errorMessage": ..}`
//! payload or a timeout is a failure; any other object is the task output.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde_json::Value;
use tracing::warn;
use vending_core::contract::AccountRequest;
use vending_core::external::{ExternalTask, TaskOutcome};
use vending_core::provider::codes;

pub struct LambdaTask {
    client: aws_sdk_lambda::Client,
    function_name: String,
    timeout: Duration,
}

impl LambdaTask {
    pub fn new(
        client: aws_sdk_lambda::Client,
        function_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            function_name: function_name.into(),
            timeout,
        }
    }

    async fn invoke(&self, request: &AccountRequest) -> TaskOutcome {
        let payload = match serde_json::to_vec(request) {
            Ok(payload) => payload,
            Err(error) => return TaskOutcome::failed(format!("invalid task payload: {error}")),
        };

        let response = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await;

        match response {
            Ok(output) => {
                let body = output
                    .payload
                    .map(|blob| blob.into_inner())
                    .unwrap_or_default();
                outcome_from_response(output.function_error.as_deref(), &body)
            }
            Err(error) => TaskOutcome::failed(format!(
                "failed to invoke {}: {}",
                self.function_name,
                DisplayErrorContext(&error)
            )),
        }
    }
}

#[async_trait]
impl ExternalTask for LambdaTask {
    async fn run(&self, request: &AccountRequest) -> TaskOutcome {
        match tokio::time::timeout(self.timeout, self.invoke(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    component = "external_task",
                    event = "timed_out",
                    function = %self.function_name,
                    account_name = %request.account_name,
                    timeout_secs = self.timeout.as_secs(),
                );
                TaskOutcome::failed(format!(
                    "{}: {} did not finish within {}s",
                    codes::TIMEOUT,
                    self.function_name,
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

/// Interprets a synchronous invocation response.
pub fn outcome_from_response(function_error: Option<&str>, body: &[u8]) -> TaskOutcome {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    if let Some(kind) = function_error {
        let reason = parsed
            .as_ref()
            .and_then(error_reason)
            .unwrap_or_else(|| kind.to_string());
        return TaskOutcome::failed(reason);
    }

    match parsed {
        Some(output) => match error_reason(&output) {
            Some(reason) => TaskOutcome::failed(reason),
            None => TaskOutcome::Succeeded { output },
        },
        None if body.is_empty() => TaskOutcome::succeeded(),
        None => TaskOutcome::failed(format!(
            "task returned a non-JSON payload: {}",
            String::from_utf8_lossy(body)
        )),
    }
}

fn error_reason(output: &Value) -> Option<String> {
    ["errorMessage", "error"]
        .into_iter()
        .find_map(|key| output.get(key))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_object_is_success_output() {
        let outcome = outcome_from_response(None, br#"{"accountId":"1","password":"p"}"#);
        assert_eq!(
            outcome,
            TaskOutcome::Succeeded {
                output: json!({"accountId": "1", "password": "p"})
            }
        );
    }

    #[test]
    fn function_error_uses_error_message() {
        let outcome = outcome_from_response(
            Some("Unhandled"),
            br#"{"errorType":"Error","errorMessage":"Password reset required"}"#,
        );
        assert_eq!(outcome, TaskOutcome::failed("Password reset required"));

        let outcome = outcome_from_response(Some("Unhandled"), b"");
        assert_eq!(outcome, TaskOutcome::failed("Unhandled"));
    }

    #[test]
    fn error_field_in_a_successful_invoke_is_a_failure() {
        let outcome = outcome_from_response(None, br#"{"error":"account already closed"}"#);
        assert_eq!(outcome, TaskOutcome::failed("account already closed"));
    }

    #[test]
    fn empty_and_garbled_payloads() {
        assert_eq!(outcome_from_response(None, b""), TaskOutcome::succeeded());
        assert!(matches!(
            outcome_from_response(None, b"<html>"),
            TaskOutcome::Failed { .. }
        ));
    }
}
