//! Route trust policy
//!
//! Each route declares the minimum trust a caller needs and whether its
//! requests must be signed. The table is built once while the router is
//! assembled and read without locks afterwards.

use std::collections::HashMap;

/// Minimum authentication a route requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustLevel {
    /// Anyone; a session token is used if present
    #[default]
    None,
    /// A live user session
    User,
    /// The configured admin secret
    Admin,
}

/// Requirements for one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteRule {
    pub trust: TrustLevel,
    pub signed: bool,
}

/// Path to rule mapping. Paths exclude the query string.
#[derive(Debug, Clone, Default)]
pub struct RouteTrustPolicy {
    routes: HashMap<String, RouteRule>,
}

impl RouteTrustPolicy {
    pub fn builder() -> RouteTrustPolicyBuilder {
        RouteTrustPolicyBuilder::default()
    }

    /// Rule for a path. Unregistered paths need no trust and no signature.
    pub fn rule(&self, path: &str) -> RouteRule {
        self.routes.get(path).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for RouteTrustPolicy
#[derive(Debug, Default)]
pub struct RouteTrustPolicyBuilder {
    routes: HashMap<String, RouteRule>,
}

impl RouteTrustPolicyBuilder {
    /// Register a route. Registering a path twice keeps the stricter trust
    /// level and signs if either registration asked for it.
    pub fn route(mut self, path: impl Into<String>, trust: TrustLevel, signed: bool) -> Self {
        let entry = self.routes.entry(path.into()).or_default();
        entry.trust = entry.trust.max(trust);
        entry.signed |= signed;
        self
    }

    pub fn build(self) -> RouteTrustPolicy {
        RouteTrustPolicy {
            routes: self.routes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let policy = RouteTrustPolicy::builder()
            .route("/v1/account/user/userinfo", TrustLevel::User, true)
            .route("/v1/man/account/user/set_status", TrustLevel::Admin, false)
            .build();

        assert_eq!(
            policy.rule("/v1/account/user/userinfo"),
            RouteRule { trust: TrustLevel::User, signed: true }
        );
        assert_eq!(policy.rule("/v1/man/account/user/set_status").trust, TrustLevel::Admin);
        assert_eq!(policy.rule("/unknown"), RouteRule::default());
        assert_eq!(policy.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_keeps_stricter() {
        let policy = RouteTrustPolicy::builder()
            .route("/a", TrustLevel::User, false)
            .route("/a", TrustLevel::None, true)
            .build();
        assert_eq!(policy.rule("/a"), RouteRule { trust: TrustLevel::User, signed: true });
    }

    #[test]
    fn test_trust_ordering() {
        assert!(TrustLevel::None < TrustLevel::User);
        assert!(TrustLevel::User < TrustLevel::Admin);
    }
}
