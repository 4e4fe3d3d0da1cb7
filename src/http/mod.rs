//! HTTP surface: per-route middleware and the standalone admission service.

mod identity;
mod middleware;
mod server;
mod service;

pub use identity::{resolve_identity, AuthenticatedSubject, UNKNOWN_IDENTITY};
pub use middleware::{
    enforce_policy, rejection_response, PolicyGuard, RejectionBody, X_RATELIMIT_REMAINING,
};
pub use server::HttpServer;
pub use service::{router, CheckRequest, PolicySummary, Stats};
