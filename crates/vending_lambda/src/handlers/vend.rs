use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use vending_core::vending::{VendOutcome, VendingAllocator};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

/// Whether the event looks like an API Gateway proxy request (REST or HTTP API).
pub fn is_api_event(event: &Value) -> bool {
    request_method(event).is_some()
}

fn request_method(event: &Value) -> Option<&str> {
    event
        .get("httpMethod")
        .or_else(|| event.pointer("/requestContext/http/method"))
        .and_then(Value::as_str)
}

/// `GET /vend`: hands out one ready account.
pub async fn handle_vend_event(event: &Value, allocator: &VendingAllocator) -> ApiGatewayResponse {
    match request_method(event) {
        Some(method) if method.eq_ignore_ascii_case("GET") => {}
        _ => {
            return ApiGatewayResponse {
                status_code: 405,
                headers: json!({"Content-Type": "application/json", "Allow": "GET"}),
                body: json!({"error": "method_not_allowed"}).to_string(),
            };
        }
    }

    match allocator.vend_one().await {
        Ok(VendOutcome::Vended(account)) => match serde_json::to_string(&account) {
            Ok(body) => json_response(200, body),
            Err(error) => internal_error(&error.to_string()),
        },
        Ok(VendOutcome::OutOfStock) => {
            json_response(503, json!({"error": "out_of_stock"}).to_string())
        }
        Err(failure) => {
            error!(component = "vend_api", event = "vend_failed", error = %failure);
            internal_error(&failure.to_string())
        }
    }
}

fn internal_error(message: &str) -> ApiGatewayResponse {
    json_response(
        500,
        json!({"error": "internal_error", "message": message}).to_string(),
    )
}

fn json_response(status_code: u16, body: String) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body,
    }
}

#[cfg(test)]
mod tests {
    use vending_core::AccountStatus;

    use super::*;
    use crate::handlers::test_support::{created, Fixture};

    fn get_request() -> Value {
        json!({"httpMethod": "GET", "path": "/vend", "body": null})
    }

    #[tokio::test]
    async fn vends_a_created_account() {
        let fixture = Fixture::new([created("ovm-a", "123456789012")]);

        let response = handle_vend_event(&get_request(), &fixture.services.allocator()).await;

        assert_eq!(response.status_code, 200);
        let body: Value = serde_json::from_str(&response.body).expect("json body");
        assert_eq!(body["account_id"], "123456789012");
        assert_eq!(
            body["cross_account_role"],
            "arn:aws:iam::123456789012:role/OVMCrossAccountRole"
        );
        assert_eq!(fixture.status_of("ovm-a").await, AccountStatus::Vended);
    }

    #[tokio::test]
    async fn empty_pool_is_service_unavailable() {
        let fixture = Fixture::new([]);

        let response = handle_vend_event(&get_request(), &fixture.services.allocator()).await;

        assert_eq!(response.status_code, 503);
        assert_eq!(response.body, r#"{"error":"out_of_stock"}"#);
    }

    #[tokio::test]
    async fn other_methods_are_rejected_without_vending() {
        let fixture = Fixture::new([created("ovm-a", "123456789012")]);
        let event = json!({"requestContext": {"http": {"method": "POST"}}});

        let response = handle_vend_event(&event, &fixture.services.allocator()).await;

        assert_eq!(response.status_code, 405);
        assert_eq!(response.headers["Allow"], "GET");
        assert_eq!(fixture.status_of("ovm-a").await, AccountStatus::Created);
    }

    #[test]
    fn recognizes_rest_and_http_api_shapes() {
        assert!(is_api_event(&get_request()));
        assert!(is_api_event(
            &json!({"requestContext": {"http": {"method": "GET"}}})
        ));
        assert!(!is_api_event(&json!({"Records": []})));
    }
}
