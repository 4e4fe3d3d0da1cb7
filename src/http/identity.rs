//! Resolving the identity a request is limited on.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

use crate::ratelimit::IdentitySource;

/// Identity used when a request carries neither a subject nor an address.
///
/// Every such request shares one bucket.
pub const UNKNOWN_IDENTITY: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The authenticated user of a request.
///
/// Inserted into request extensions by the authentication layer that runs
/// before the rate limit middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Pick the identity for a request.
///
/// Precedence: the authenticated subject when `source` asks for it, then the
/// first `X-Forwarded-For` hop when the proxy is trusted, then the peer
/// address, then [`UNKNOWN_IDENTITY`].
pub fn resolve_identity(
    extensions: &Extensions,
    headers: &HeaderMap,
    source: IdentitySource,
    trust_forwarded_for: bool,
) -> String {
    if source == IdentitySource::Subject {
        if let Some(AuthenticatedSubject(subject)) = extensions.get::<AuthenticatedSubject>() {
            if !subject.is_empty() {
                return subject.clone();
            }
        }
    }

    if trust_forwarded_for {
        if let Some(hop) = forwarded_client(headers) {
            return hop;
        }
    }

    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    UNKNOWN_IDENTITY.to_string()
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}
