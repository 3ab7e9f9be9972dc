//! GitHub webhook endpoint.
//!
//! The handler only:
//! 1. Verifies the signature over the raw body
//! 2. Parses the body as JSON
//! 3. Spawns background processing and returns 202 immediately

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::events::{Dispatcher, WebhookDelivery};
use crate::web::signature::verify_github_signature;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// State for the webhook route.
#[derive(Clone)]
pub struct WebhookState {
    pub secret: Option<Arc<str>>,
    pub dispatcher: Dispatcher,
}

impl WebhookState {
    pub fn new(secret: Option<String>, dispatcher: Dispatcher) -> Self {
        Self {
            secret: secret.map(Arc::from),
            dispatcher,
        }
    }
}

/// Webhook response. `delivery_id` is `null` unless the delivery was accepted.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub delivery_id: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GitHub webhook endpoint.
pub async fn github_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let delivery_id = header(&headers, DELIVERY_HEADER).unwrap_or("unknown").to_string();
    let event = header(&headers, EVENT_HEADER).unwrap_or_default().to_string();

    info!(
        delivery_id = %delivery_id,
        event = %event,
        body_length = body.len(),
        has_signature = headers.contains_key(SIGNATURE_HEADER),
        "github_webhook_received"
    );

    if !verify_github_signature(
        state.secret.as_deref(),
        &body,
        header(&headers, SIGNATURE_HEADER),
    ) {
        warn!(delivery_id = %delivery_id, "github_signature_invalid");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse {
                status: "unauthorized",
                delivery_id: None,
            }),
        );
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "github_payload_invalid");
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookResponse {
                    status: "invalid_payload",
                    delivery_id: None,
                }),
            );
        }
    };

    let delivery = WebhookDelivery::new(delivery_id.clone(), event, payload);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.process(delivery).await;
    });

    info!(delivery_id = %delivery_id, "github_webhook_accepted");

    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            status: "accepted",
            delivery_id: Some(delivery_id),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{AgentRegistry, PrAutomationConfig, PrConfigStore};
    use crate::cache::{Cache, MemoryCache};
    use crate::config::AutomationDefaults;
    use crate::studio::StudioClient;
    use crate::web::signature::compute_github_signature;
    use axum::{body::Body, http::Request, routing::post, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const BODY: &str = r#"{"repository":{"name":"test-repo"},"action":"opened"}"#;

    fn app(cache: Arc<MemoryCache>) -> Router {
        let studio = StudioClient::new("http://127.0.0.1:9", None, Duration::from_millis(100)).unwrap();
        let pr_configs = Arc::new(PrConfigStore::new(
            cache.clone(),
            PrAutomationConfig::from(&AutomationDefaults::default()),
        ));
        let dispatcher = Dispatcher::new(None, studio, cache, pr_configs, Arc::new(AgentRegistry::new()), true);
        Router::new()
            .route("/webhooks/github", post(github_webhook))
            .with_state(WebhookState::new(Some(SECRET.to_string()), dispatcher))
    }

    fn request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header(EVENT_HEADER, "issues")
            .header(DELIVERY_HEADER, "d-100");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_signature_is_accepted() {
        let cache = Arc::new(MemoryCache::new());
        let signature = compute_github_signature(SECRET, BODY.as_bytes()).unwrap();

        let response = app(cache.clone())
            .oneshot(request(BODY, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["delivery_id"], "d-100");

        // Processing runs in the background; wait for the stored delivery.
        for _ in 0..50 {
            if cache.get("webhook:d-100").await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("delivery was not processed");
    }

    #[tokio::test]
    async fn test_invalid_signature_is_rejected() {
        let cache = Arc::new(MemoryCache::new());

        let response = app(cache.clone())
            .oneshot(request(BODY, Some("sha256=invalid")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "unauthorized");
        assert!(body["delivery_id"].is_null());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected() {
        let response = app(Arc::new(MemoryCache::new()))
            .oneshot(request(BODY, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_non_json_body_is_bad_request() {
        let body = "not json";
        let signature = compute_github_signature(SECRET, body.as_bytes()).unwrap();

        let response = app(Arc::new(MemoryCache::new()))
            .oneshot(request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["status"], "invalid_payload");
    }
}
