//! Inbound GitHub webhook endpoint.
//!
//! Verifies the delivery, answers 202 right away and hands the parsed
//! payload to the [`crate::events::Dispatcher`] on a background task.

pub mod handlers;
pub mod signature;

use axum::{routing::post, Router};

pub use handlers::{github_webhook, WebhookResponse, WebhookState};
pub use signature::{
    compute_github_signature, is_signature_verification_enabled, verify_github_signature,
};

/// Router serving `POST /webhooks/github`.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/github", post(github_webhook))
        .with_state(state)
}
