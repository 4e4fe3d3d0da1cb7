//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::policy::{Policy, PolicyCatalog, WindowLimit};
use super::window::{Decision, WindowStore};
use crate::error::{RateGateError, Result};

/// The policy layer over a single [`WindowStore`].
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
/// All named policies share the same store; their keys never collide because
/// each is prefixed with the policy namespace.
pub struct RateLimiter {
    /// Sliding-window state for every key
    store: WindowStore,
    /// Registered policies
    policies: PolicyCatalog,
    /// Time source for admission checks and sweeps
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new(policies: PolicyCatalog) -> Self {
        Self::with_clock(policies, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter with an explicit clock.
    pub fn with_clock(policies: PolicyCatalog, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: WindowStore::new(),
            policies,
            clock,
        }
    }

    /// Check one request for `identity` under `namespace` with the given window.
    pub fn evaluate(&self, namespace: &str, identity: &str, limit: WindowLimit) -> Decision {
        let key = RateLimitKey::new(namespace, identity);
        let now = self.clock.now_millis();

        trace!(
            key = %key,
            window_ms = limit.window_ms,
            max_requests = limit.max_requests,
            "Checking rate limit"
        );

        let decision =
            self.store
                .check_and_record(&key.to_string_key(), limit.window_ms, limit.max_requests, now);

        if !decision.allowed {
            debug!(
                key = %key,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Check one request against a registered policy.
    pub fn check_policy(&self, policy: &Policy, identity: &str) -> Decision {
        self.evaluate(policy.namespace(), identity, policy.limit())
    }

    /// Check one request against the policy named `policy`.
    pub fn check(&self, policy: &str, identity: &str) -> Result<Decision> {
        let policy = self
            .policies
            .get(policy)
            .ok_or_else(|| RateGateError::UnknownPolicy(policy.to_string()))?;
        Ok(self.check_policy(&policy, identity))
    }

    /// Evict expired state at the current time. Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        let evicted = self.store.sweep(self.clock.now_millis());
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.store.len(), "Swept expired keys");
        }
        evicted
    }

    /// The registered policies.
    pub fn policies(&self) -> &PolicyCatalog {
        &self.policies
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// Clear all tracked state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PolicyCatalog::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::policy::PolicyRule;
    use std::time::Duration;

    fn limiter_with(rules: Vec<PolicyRule>) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(0);
        let catalog = PolicyCatalog::from_rules(rules).unwrap();
        (RateLimiter::with_clock(catalog, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.tracked_keys(), 0);
        assert_eq!(limiter.policies().len(), 4);
    }

    #[test]
    fn test_check_creates_namespaced_key() {
        let (limiter, _clock) = limiter_with(vec![PolicyRule::new("auth", 60_000, 3)]);

        let decision = limiter.check("auth", "1.2.3.4").unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(limiter.store.recorded("auth:1.2.3.4"), Some(1));
    }

    #[test]
    fn test_auth_policy_scenario() {
        let (limiter, clock) = limiter_with(vec![PolicyRule::new("auth", 60_000, 3)]);

        for expected in [2, 1, 0] {
            let d = limiter.check("auth", "1.2.3.4").unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected);
            clock.advance(Duration::from_millis(100));
        }

        let denied = limiter.check("auth", "1.2.3.4").unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs, 60);

        clock.set(60_201);
        let d = limiter.check("auth", "1.2.3.4").unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
    }

    #[test]
    fn test_unknown_policy() {
        let limiter = RateLimiter::default();
        let err = limiter.check("checkout", "1.2.3.4").unwrap_err();
        assert!(matches!(err, RateGateError::UnknownPolicy(name) if name == "checkout"));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_policies_share_store_without_interfering() {
        let (limiter, _clock) = limiter_with(vec![
            PolicyRule::new("auth", 60_000, 2),
            PolicyRule::new("search", 60_000, 2),
        ]);

        limiter.check("auth", "1.2.3.4").unwrap();
        limiter.check("auth", "1.2.3.4").unwrap();
        assert!(!limiter.check("auth", "1.2.3.4").unwrap().allowed);

        let search = limiter.check("search", "1.2.3.4").unwrap();
        assert!(search.allowed);
        assert_eq!(search.remaining, 1);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_evaluate_with_ad_hoc_limit() {
        let (limiter, _clock) = limiter_with(Vec::new());
        let limit = WindowLimit {
            window_ms: 1_000,
            max_requests: 1,
        };

        assert!(limiter.evaluate("export", "user-7", limit).allowed);
        assert!(!limiter.evaluate("export", "user-7", limit).allowed);
    }

    #[test]
    fn test_sweep_uses_clock() {
        let (limiter, clock) = limiter_with(vec![PolicyRule::new("api", 1_000, 10)]);

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            limiter.check("api", ip).unwrap();
        }
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked_keys(), 3);

        clock.advance(Duration::from_millis(1_001));
        assert_eq!(limiter.sweep(), 3);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_clear() {
        let limiter = RateLimiter::default();
        limiter.check("api", "10.0.0.1").unwrap();
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
