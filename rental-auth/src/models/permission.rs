//! Role -> permission grants.

use std::collections::HashMap;
use std::fmt;

use super::user::Role;

pub const WILDCARD: &str = "*";

/// A single `{action, resource}` grant; either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub action: String,
    pub resource: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// Parse `"action:resource"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let (action, resource) = spec.split_once(':')?;
        if action.is_empty() || resource.is_empty() {
            return None;
        }
        Some(Self::new(action, resource))
    }

    pub fn grants(&self, action: &str, resource: &str) -> bool {
        (self.action == WILDCARD || self.action == action)
            && (self.resource == WILDCARD || self.resource == resource)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

fn grants(specs: &[&str]) -> Vec<Permission> {
    specs.iter().filter_map(|s| Permission::parse(s)).collect()
}

/// The built-in marketplace grant table.
pub fn default_grants() -> HashMap<Role, Vec<Permission>> {
    HashMap::from([
        (
            Role::Client,
            grants(&[
                "read:properties",
                "create:bookings",
                "read:bookings",
                "update:bookings",
                "read:profile",
                "update:profile",
                "*:messages",
            ]),
        ),
        (
            Role::Agent,
            grants(&[
                "create:properties",
                "update:properties",
                "read:properties",
                "read:bookings",
                "update:bookings",
                "read:profile",
                "update:profile",
                "*:messages",
                "create:kyc",
            ]),
        ),
        (
            Role::Admin,
            grants(&[
                "*:properties",
                "*:bookings",
                "*:users",
                "read:audit_logs",
                "*:kyc",
                "read:payments",
            ]),
        ),
        (Role::SuperAdmin, grants(&["*:*"])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_malformed_specs() {
        assert_eq!(Permission::parse("read:properties"), Some(Permission::new("read", "properties")));
        assert!(Permission::parse("read").is_none());
        assert!(Permission::parse(":properties").is_none());
    }

    #[test]
    fn wildcard_matching() {
        let any_action = Permission::new("*", "messages");
        assert!(any_action.grants("delete", "messages"));
        assert!(!any_action.grants("delete", "properties"));
        assert!(Permission::new("*", "*").grants("anything", "anywhere"));
    }

    #[test]
    fn every_role_has_grants() {
        let table = default_grants();
        for role in Role::ALL {
            assert!(!table[&role].is_empty(), "{} has no grants", role);
        }
    }
}
