//! Rate limit key composition.

/// A key that uniquely identifies one rate-limited subject.
///
/// The key is composed of the policy namespace and the caller identity
/// (client address or user id), so policies sharing a store never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The policy namespace, e.g. `auth`
    pub namespace: String,
    /// The identity being limited, e.g. `1.2.3.4` or a user id
    pub identity: String,
}

impl RateLimitKey {
    /// Create a new key.
    pub fn new(namespace: &str, identity: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// The `namespace:identity` form used as the store key.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.namespace, self.identity)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_creation() {
        let key = RateLimitKey::new("order", "user-42");

        assert_eq!(key.namespace, "order");
        assert_eq!(key.identity, "user-42");
        assert_eq!(key.to_string_key(), "order:user-42");
        assert_eq!(key.to_string(), "order:user-42");
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(
            RateLimitKey::new("auth", "1.2.3.4"),
            RateLimitKey::new("auth", "1.2.3.4")
        );
        assert_ne!(
            RateLimitKey::new("auth", "1.2.3.4"),
            RateLimitKey::new("api", "1.2.3.4")
        );
    }

    #[test]
    fn test_ipv6_identity_keeps_colons() {
        let key = RateLimitKey::new("api", "::1");
        assert_eq!(key.to_string_key(), "api:::1");
    }
}
