//! Rate limit policies and the policy catalogue.
//!
//! A policy names a request class (`api`, `auth`, `order`, `search`) and the
//! sliding window applied to it. Policies are validated once, when the
//! catalogue is built, and are immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{RateGateError, Result};

/// Message returned with a 429 when a policy does not set its own.
pub const DEFAULT_MESSAGE: &str = "Too many requests";

const MINUTE_MS: u64 = 60_000;

/// Longest window a policy may declare: one week.
pub const MAX_WINDOW_MS: u64 = 7 * 24 * 60 * MINUTE_MS;

/// Where a policy takes the identity it limits on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The client network address
    #[default]
    ClientAddr,
    /// The authenticated user, falling back to the client address
    Subject,
}

/// A policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Namespace prefixed to every key of this policy
    pub namespace: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Identity the policy limits on
    #[serde(default)]
    pub identity: IdentitySource,
    /// Error message sent with a 429
    #[serde(default)]
    pub message: Option<String>,
    /// Whether to send `X-RateLimit-Remaining`
    #[serde(default)]
    pub expose_remaining: bool,
}

impl PolicyRule {
    /// Create a rule limiting by client address with the default message.
    pub fn new(namespace: &str, window_ms: u64, max_requests: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            window_ms,
            max_requests,
            identity: IdentitySource::ClientAddr,
            message: None,
            expose_remaining: false,
        }
    }
}

/// The built-in catalogue: general API traffic, credential routes, order
/// placement per user, and search.
pub fn default_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            expose_remaining: true,
            ..PolicyRule::new("api", MINUTE_MS, 200)
        },
        PolicyRule {
            message: Some("Too many login attempts. Please try again later.".to_string()),
            ..PolicyRule::new("auth", MINUTE_MS, 20)
        },
        PolicyRule {
            identity: IdentitySource::Subject,
            message: Some(
                "Order limit reached. Please wait before placing another order.".to_string(),
            ),
            ..PolicyRule::new("order", MINUTE_MS, 30)
        },
        PolicyRule {
            message: Some("Search limit reached. Please slow down.".to_string()),
            ..PolicyRule::new("search", MINUTE_MS, 60)
        },
    ]
}

/// Window parameters handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
}

/// A validated policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    namespace: String,
    limit: WindowLimit,
    identity: IdentitySource,
    message: String,
    expose_remaining: bool,
}

impl Policy {
    /// Validate a configured rule.
    ///
    /// The namespace must be non-empty and free of `:` so keys stay
    /// unambiguous, and the window must be positive and no longer than
    /// [`MAX_WINDOW_MS`]. `max_requests = 0` is accepted and closes the route.
    pub fn new(rule: PolicyRule) -> Result<Self> {
        let invalid = |reason: &str| RateGateError::InvalidPolicy {
            namespace: rule.namespace.clone(),
            reason: reason.to_string(),
        };

        if rule.namespace.trim().is_empty() {
            return Err(invalid("namespace must not be empty"));
        }
        if rule.namespace.contains(':') {
            return Err(invalid("namespace must not contain ':'"));
        }
        if rule.window_ms == 0 {
            return Err(invalid("window_ms must be positive"));
        }
        if rule.window_ms > MAX_WINDOW_MS {
            return Err(invalid("window_ms must not exceed one week"));
        }

        Ok(Self {
            limit: WindowLimit {
                window_ms: rule.window_ms,
                max_requests: rule.max_requests,
            },
            identity: rule.identity,
            message: rule.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            expose_remaining: rule.expose_remaining,
            namespace: rule.namespace,
        })
    }

    /// Request class this policy applies to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Window length and request budget.
    pub fn limit(&self) -> WindowLimit {
        self.limit
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.limit.window_ms)
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.limit.max_requests
    }

    /// Where the limited identity comes from.
    pub fn identity(&self) -> IdentitySource {
        self.identity
    }

    /// Message sent with a 429.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether allowed responses carry `X-RateLimit-Remaining`.
    pub fn expose_remaining(&self) -> bool {
        self.expose_remaining
    }
}

/// Policy file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// The set of named policies, keyed by namespace.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    policies: HashMap<String, Arc<Policy>>,
}

impl PolicyCatalog {
    /// Validate and register a list of rules.
    ///
    /// Fails on the first invalid rule or on a repeated namespace.
    pub fn from_rules(rules: Vec<PolicyRule>) -> Result<Self> {
        let mut policies = HashMap::with_capacity(rules.len());

        for rule in rules {
            let policy = Policy::new(rule)?;
            let namespace = policy.namespace().to_string();
            if policies.contains_key(&namespace) {
                return Err(RateGateError::InvalidPolicy {
                    namespace,
                    reason: "namespace is registered twice".to_string(),
                });
            }
            policies.insert(namespace, Arc::new(policy));
        }

        Ok(Self { policies })
    }

    /// Load a policy file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a policy file from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| RateGateError::Config(format!("Failed to parse policy file: {}", e)))?;
        Self::from_rules(file.policies)
    }

    /// Look up a policy by namespace.
    pub fn get(&self, namespace: &str) -> Option<Arc<Policy>> {
        self.policies.get(namespace).cloned()
    }

    /// All policies, sorted by namespace.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy>> {
        let mut policies: Vec<_> = self.policies.values().collect();
        policies.sort_by(|a, b| a.namespace().cmp(b.namespace()));
        policies.into_iter()
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// True when no policy is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// The shortest window across all policies.
    pub fn smallest_window(&self) -> Option<Duration> {
        self.policies.values().map(|p| p.window()).min()
    }
}

impl Default for PolicyCatalog {
    /// The built-in catalogue; empty if the built-in rules fail validation.
    fn default() -> Self {
        match Self::from_rules(default_rules()) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Built-in policies failed validation");
                Self {
                    policies: HashMap::new(),
                }
            }
        }
    }
}
