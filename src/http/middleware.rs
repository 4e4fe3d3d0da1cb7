//! Per-route rate limit middleware.
//!
//! ```ignore
//! let guard = PolicyGuard::from_config(limiter.clone(), "auth", &config.rate_limiting)?;
//! let auth_routes = Router::new()
//!     .route("/signin", post(sign_in))
//!     .layer(axum::middleware::from_fn_with_state(guard, enforce_policy));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::identity::{resolve_identity, UNKNOWN_IDENTITY};
use crate::config::RateLimitingConfig;
use crate::error::{RateGateError, Result};
use crate::ratelimit::{Decision, Policy, RateLimiter};

/// Header carrying the quota left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub retry_after: u64,
}

/// Middleware state binding one policy to the shared limiter.
#[derive(Clone)]
pub struct PolicyGuard {
    limiter: Arc<RateLimiter>,
    policy: Arc<Policy>,
    trust_forwarded_for: bool,
}

impl PolicyGuard {
    /// Bind an already resolved policy; `X-Forwarded-For` is ignored.
    pub fn new(limiter: Arc<RateLimiter>, policy: Arc<Policy>) -> Self {
        Self {
            limiter,
            policy,
            trust_forwarded_for: false,
        }
    }

    /// Bind the limiter's policy named `name`.
    pub fn for_policy(limiter: Arc<RateLimiter>, name: &str) -> Result<Self> {
        let policy = limiter
            .policies()
            .get(name)
            .ok_or_else(|| RateGateError::UnknownPolicy(name.to_string()))?;
        Ok(Self::new(limiter, policy))
    }

    /// Bind the policy named `name` with the proxy settings from configuration.
    pub fn from_config(
        limiter: Arc<RateLimiter>,
        name: &str,
        config: &RateLimitingConfig,
    ) -> Result<Self> {
        Ok(Self::for_policy(limiter, name)?.trust_forwarded_for(config.trust_forwarded_for))
    }

    /// Take the client from `X-Forwarded-For` when running behind a proxy.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// The policy this guard enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// Admit the request or answer 429 before the handler runs.
pub async fn enforce_policy(
    State(guard): State<PolicyGuard>,
    request: Request,
    next: Next,
) -> Response {
    let identity = resolve_identity(
        request.extensions(),
        request.headers(),
        guard.policy.identity(),
        guard.trust_forwarded_for,
    );
    if identity == UNKNOWN_IDENTITY {
        warn!(
            policy = %guard.policy.namespace(),
            "No identity for request, using shared bucket"
        );
    }

    let decision = guard.limiter.check_policy(&guard.policy, &identity);
    if !decision.allowed {
        debug!(
            policy = %guard.policy.namespace(),
            identity = %identity,
            retry_after_secs = decision.retry_after_secs,
            "Request rejected"
        );
        return rejection_response(&guard.policy, &decision);
    }

    let mut response = next.run(request).await;
    if guard.policy.expose_remaining() {
        set_remaining(&mut response, decision.remaining);
    }
    response
}

/// Build the 429 response for a denied decision.
pub fn rejection_response(policy: &Policy, decision: &Decision) -> Response {
    let body = RejectionBody {
        error: policy.message().to_string(),
        retry_after: decision.retry_after_secs,
    };
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs))],
        Json(body),
    )
        .into_response();

    if policy.expose_remaining() {
        set_remaining(&mut response, decision.remaining);
    }
    response
}

fn set_remaining(response: &mut Response, remaining: u64) {
    response
        .headers_mut()
        .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}
