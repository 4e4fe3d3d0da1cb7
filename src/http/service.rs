//! Admission check service.
//!
//! Exposes the limiter over HTTP for callers that cannot embed the
//! middleware: they send a policy name and an identity and get the decision
//! back with the same status codes and headers the middleware would use.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::middleware::rejection_response;
use crate::ratelimit::RateLimiter;

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub policy: String,
    pub identity: String,
}

/// A policy as listed by `GET /v1/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub namespace: String,
    pub window_ms: u64,
    pub max_requests: u64,
}

/// Body of `GET /v1/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub tracked_keys: usize,
    pub policies: Vec<PolicySummary>,
}

/// Build the service router over a shared limiter.
pub fn router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/check", post(check))
        .route("/v1/stats", get(stats))
        .with_state(limiter)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Decide whether the caller identified in the body may proceed.
#[instrument(skip(limiter, request), fields(policy = %request.policy))]
async fn check(
    State(limiter): State<Arc<RateLimiter>>,
    Json(request): Json<CheckRequest>,
) -> Response {
    let identity = request.identity.trim();
    if identity.is_empty() {
        warn!("Received admission check with empty identity");
        return error_response(StatusCode::BAD_REQUEST, "identity is required");
    }

    let Some(policy) = limiter.policies().get(&request.policy) else {
        warn!("Received admission check for unknown policy");
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("unknown policy '{}'", request.policy),
        );
    };

    let decision = limiter.check_policy(&policy, identity);
    debug!(
        identity = %identity,
        allowed = decision.allowed,
        remaining = decision.remaining,
        "Admission decision made"
    );

    if decision.allowed {
        (StatusCode::OK, Json(decision)).into_response()
    } else {
        rejection_response(&policy, &decision)
    }
}

async fn stats(State(limiter): State<Arc<RateLimiter>>) -> Json<Stats> {
    let policies = limiter
        .policies()
        .iter()
        .map(|p| PolicySummary {
            namespace: p.namespace().to_string(),
            window_ms: p.limit().window_ms,
            max_requests: p.max_requests(),
        })
        .collect();

    let stats = Stats {
        tracked_keys: limiter.tracked_keys(),
        policies,
    };
    info!(tracked_keys = stats.tracked_keys, "Stats requested");
    Json(stats)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::RejectionBody;
    use crate::ratelimit::{Decision, ManualClock, PolicyCatalog, PolicyRule};
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<RateLimiter>, ManualClock) {
        let clock = ManualClock::new(0);
        let catalog = PolicyCatalog::from_rules(vec![
            PolicyRule {
                message: Some("Too many login attempts. Please try again later.".to_string()),
                ..PolicyRule::new("auth", 60_000, 3)
            },
            PolicyRule::new("search", 60_000, 60),
        ])
        .unwrap();
        let limiter = Arc::new(RateLimiter::with_clock(catalog, Arc::new(clock.clone())));
        (router(Arc::clone(&limiter)), limiter, clock)
    }

    fn check_request(policy: &str, identity: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/v1/check")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "policy": policy, "identity": identity }).to_string(),
            ))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_check_scenario() {
        let (app, _, clock) = app();

        for expected in [2, 1, 0] {
            let response = app
                .clone()
                .oneshot(check_request("auth", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let decision: serde_json::Value = json_body(response).await;
            assert_eq!(decision["allowed"], true);
            assert_eq!(decision["remaining"], expected);
            clock.advance(std::time::Duration::from_millis(100));
        }

        let response = app.oneshot(check_request("auth", "1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        let body: RejectionBody = json_body(response).await;
        assert_eq!(body.retry_after, 60);
        assert_eq!(body.error, "Too many login attempts. Please try again later.");
    }

    #[tokio::test]
    async fn test_check_response_shape() {
        let (app, _, _) = app();
        let response = app.oneshot(check_request("search", "10.0.0.1")).await.unwrap();

        let body: serde_json::Value = json_body(response).await;
        let expected = serde_json::to_value(Decision {
            allowed: true,
            remaining: 59,
            retry_after_secs: 0,
        })
        .unwrap();
        assert_eq!(body, expected);
        assert_eq!(body["retryAfter"], 0);
    }

    #[tokio::test]
    async fn test_unknown_policy_is_not_found() {
        let (app, limiter, _) = app();
        let response = app.oneshot(check_request("checkout", "10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_empty_identity_rejected() {
        let (app, limiter, _) = app();
        let response = app.oneshot(check_request("auth", "   ")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, _, _) = app();
        app.clone()
            .oneshot(check_request("auth", "10.0.0.1"))
            .await
            .unwrap();
        app.clone()
            .oneshot(check_request("search", "10.0.0.1"))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats: Stats = json_body(response).await;

        assert_eq!(stats.tracked_keys, 2);
        assert_eq!(
            stats.policies,
            vec![
                PolicySummary {
                    namespace: "auth".to_string(),
                    window_ms: 60_000,
                    max_requests: 3,
                },
                PolicySummary {
                    namespace: "search".to_string(),
                    window_ms: 60_000,
                    max_requests: 60,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_checks_respect_limit() {
        let (app, _, _) = app();

        let responses = futures::future::join_all(
            (0..10).map(|_| app.clone().oneshot(check_request("auth", "9.9.9.9"))),
        )
        .await;

        let admitted = responses
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.status() == StatusCode::OK)
            .count();
        assert_eq!(admitted, 3);
    }
}
