//! Webhook Receiver
//!
//! Receives GitHub webhook deliveries and posts the review guidelines on newly
//! opened pull requests.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::gateway::RepositoryGateway;
use crate::guidelines::{wrap_guidelines, GuidelineSource};
use crate::pr::PrRef;

#[derive(Clone)]
pub struct WebhookState {
    secret: Arc<Vec<u8>>,
    gateway: Arc<dyn RepositoryGateway>,
    guidelines: Arc<dyn GuidelineSource>,
}

impl WebhookState {
    pub fn new(
        secret: impl Into<Vec<u8>>,
        gateway: Arc<dyn RepositoryGateway>,
        guidelines: Arc<dyn GuidelineSource>,
    ) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            gateway,
            guidelines,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub name: String,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "umbridge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn receive_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|value| value.to_str().ok());
    if !signature.is_some_and(|s| verify_signature(&state.secret, &body, s)) {
        warn!("Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    match event {
        "ping" => {
            info!("Received ping event");
            StatusCode::OK
        }
        "pull_request" => match serde_json::from_slice::<PullRequestEvent>(&body) {
            Ok(payload) if payload.action == "opened" => {
                if let Err(e) = handle_pull_request_opened(
                    state.gateway.as_ref(),
                    state.guidelines.as_ref(),
                    &payload,
                )
                .await
                {
                    let status = e.downcast_ref::<GatewayError>().and_then(GatewayError::status);
                    error!(
                        repo = %payload.repository.name,
                        pr = payload.pull_request.number,
                        status = ?status,
                        error = %format!("{e:#}"),
                        "Failed to post guidelines"
                    );
                }
                StatusCode::OK
            }
            Ok(payload) => {
                info!(action = %payload.action, "Ignoring pull_request action");
                StatusCode::OK
            }
            Err(e) => {
                error!(error = %e, "Failed to parse pull_request payload");
                StatusCode::BAD_REQUEST
            }
        },
        other => {
            info!(event = other, "Ignoring GitHub event");
            StatusCode::OK
        }
    }
}

/// Check a `sha256=<hex>` signature against the raw request body
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Post the wrapped guidelines on a newly opened pull request
pub async fn handle_pull_request_opened(
    gateway: &dyn RepositoryGateway,
    guidelines: &dyn GuidelineSource,
    event: &PullRequestEvent,
) -> Result<()> {
    let pr = PrRef::new(event.repository.name.clone(), event.pull_request.number);

    let markdown = guidelines
        .fetch_markdown()
        .await
        .context("Failed to fetch review guidelines")?;

    gateway
        .post_issue_comment(&pr, &wrap_guidelines(&markdown))
        .await
        .with_context(|| format!("Failed to comment on {}", pr))?;

    info!(pr = %pr, url = %event.pull_request.html_url, "Posted review guidelines");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, StaticGuidelines};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"It's a Secret to Everybody";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn opened_event(action: &str) -> String {
        serde_json::json!({
            "action": action,
            "number": 17,
            "pull_request": {
                "number": 17,
                "html_url": "https://github.com/acme/api/pull/17",
                "title": "Add retries"
            },
            "repository": { "name": "api", "full_name": "acme/api" }
        })
        .to_string()
    }

    fn delivery(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("X-GitHub-Event", event)
            .header("Content-Type", "application/json");
        if let Some(signature) = signature {
            request = request.header("X-Hub-Signature-256", signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    fn app(gateway: Arc<FakeGateway>, markdown: Option<&str>) -> Router {
        router(WebhookState::new(
            SECRET.to_vec(),
            gateway,
            Arc::new(StaticGuidelines(markdown.map(str::to_string))),
        ))
    }

    #[test]
    fn test_signature_verification() {
        // Example from GitHub's webhook documentation
        assert!(verify_signature(
            SECRET,
            b"Hello, World!",
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        ));
        assert!(!verify_signature(SECRET, b"Hello, World!", "sha256=deadbeef"));
        assert!(!verify_signature(SECRET, b"Hello, World!", "sha1=757107ea"));
        assert!(!verify_signature(SECRET, b"Hello, World!", "sha256=not-hex"));
    }

    #[tokio::test]
    async fn test_opened_posts_wrapped_guidelines() {
        let gateway = Arc::new(FakeGateway::new());
        let body = opened_event("opened");

        let response = app(gateway.clone(), Some("- Keep PRs small"))
            .oneshot(delivery("pull_request", &body, Some(sign(body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let posted = gateway.posted_comments();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, PrRef::new("api", 17));
        assert_eq!(posted[0].1, wrap_guidelines("- Keep PRs small"));
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let gateway = Arc::new(FakeGateway::new());
        let body = opened_event("opened");

        let unsigned = app(gateway.clone(), Some("x"))
            .oneshot(delivery("pull_request", &body, None))
            .await
            .unwrap();
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let forged = app(gateway.clone(), Some("x"))
            .oneshot(delivery("pull_request", &body, Some(sign(b"other body"))))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        assert!(gateway.posted_comments().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_other_actions_and_events() {
        let gateway = Arc::new(FakeGateway::new());

        let body = opened_event("synchronize");
        let response = app(gateway.clone(), Some("x"))
            .oneshot(delivery("pull_request", &body, Some(sign(body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = r#"{"zen":"Keep it logically awesome."}"#;
        let response = app(gateway.clone(), Some("x"))
            .oneshot(delivery("ping", body, Some(sign(body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(gateway.posted_comments().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let gateway = Arc::new(FakeGateway::new());
        let body = r#"{"action":"opened"}"#;

        let response = app(gateway, Some("x"))
            .oneshot(delivery("pull_request", body, Some(sign(body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_guideline_failure_posts_nothing() {
        let gateway = Arc::new(FakeGateway::new());
        let body = opened_event("opened");

        let response = app(gateway.clone(), None)
            .oneshot(delivery("pull_request", &body, Some(sign(body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(gateway.posted_comments().is_empty());
    }

    #[tokio::test]
    async fn test_handler_direct() {
        let gateway = FakeGateway::new();
        let event: PullRequestEvent = serde_json::from_str(&opened_event("opened")).unwrap();

        handle_pull_request_opened(&gateway, &StaticGuidelines(Some("rules".into())), &event)
            .await
            .unwrap();

        assert_eq!(gateway.posted_comments().len(), 1);
        assert_eq!(gateway.requests().get(), 1);
    }
}
