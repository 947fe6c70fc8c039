use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RejectedError;

/// Wildcard marker. Only valid as the final character of a scope.
pub const WILDCARD: char = '*';

const MAX_SCOPE_LEN: usize = 256;

/// Resource/task pattern a consent applies to, e.g. `task:Q4-FILING`,
/// `inventory:*` or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    /// Parse and validate a scope pattern.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RejectedError> {
        let scope = Self(raw.into().trim().to_string());
        scope.validate()?;
        Ok(scope)
    }

    /// The all-encompassing scope.
    pub fn any() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with(WILDCARD)
    }

    pub fn validate(&self) -> Result<(), RejectedError> {
        let malformed = |reason: &str| RejectedError::MalformedScope {
            scope: self.0.clone(),
            reason: reason.to_string(),
        };

        if self.0.is_empty() {
            return Err(malformed("scope is empty"));
        }
        if self.0.len() > MAX_SCOPE_LEN {
            return Err(malformed("scope is too long"));
        }
        if self.0.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(malformed("scope contains whitespace or control characters"));
        }
        let stars = self.0.matches(WILDCARD).count();
        if stars > 1 || (stars == 1 && !self.is_wildcard()) {
            return Err(malformed("wildcard is only allowed as the final character"));
        }
        Ok(())
    }

    /// True when every scope matched by `other` is also matched by `self`.
    ///
    /// Exact match, or `self` ends in `*` and `other` starts with the prefix
    /// before it. `inventory:*` contains `inventory:SKU123` and
    /// `inventory:eu:*`, but not `inventory` or `*`.
    pub fn contains(&self, other: &Scope) -> bool {
        match self.0.strip_suffix(WILDCARD) {
            Some(prefix) => other.0.starts_with(prefix),
            None => self.0 == other.0,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scope(raw: &str) -> Scope {
        Scope::parse(raw).unwrap()
    }

    #[test]
    fn wildcard_suffix_contains_specific() {
        assert!(scope("inventory:*").contains(&scope("inventory:SKU123")));
        assert!(scope("inventory:*").contains(&scope("inventory:eu:*")));
        assert!(scope("inventory:*").contains(&scope("inventory:*")));
        assert!(!scope("inventory:*").contains(&scope("orders:1")));
    }

    #[test]
    fn specific_does_not_contain_wildcard() {
        assert!(!scope("inventory:SKU1").contains(&scope("inventory:*")));
        assert!(!scope("inventory:SKU1").contains(&scope("inventory:SKU12")));
        assert!(scope("inventory:SKU1").contains(&scope("inventory:SKU1")));
    }

    #[test]
    fn global_wildcard_contains_everything() {
        assert!(Scope::any().contains(&scope("task:Q4-FILING")));
        assert!(Scope::any().contains(&Scope::any()));
        assert!(!scope("task:*").contains(&Scope::any()));
    }

    #[test]
    fn malformed_scopes_are_rejected() {
        assert!(Scope::parse("").is_err());
        assert!(Scope::parse("   ").is_err());
        assert!(Scope::parse("inv entory").is_err());
        assert!(Scope::parse("inv*:x").is_err());
        assert!(Scope::parse("inv:**").is_err());
        assert!(Scope::parse("a".repeat(MAX_SCOPE_LEN + 1)).is_err());
    }

    #[test]
    fn parse_trims() {
        assert_eq!(scope("  task:1 ").as_str(), "task:1");
    }

    proptest! {
        #[test]
        fn containment_is_reflexive(raw in "[a-z0-9:_-]{1,20}\\*?") {
            let s = scope(&raw);
            prop_assert!(s.contains(&s));
        }

        #[test]
        fn containment_is_transitive(
            a in "[a-z]{0,3}",
            b in "[a-z]{0,3}",
            c in "[a-z]{1,3}",
        ) {
            let outer = scope(&format!("{a}*"));
            let middle = scope(&format!("{a}{b}*"));
            let inner = scope(&format!("{a}{b}{c}"));
            prop_assert!(outer.contains(&middle));
            prop_assert!(middle.contains(&inner));
            prop_assert!(outer.contains(&inner));
        }
    }
}
