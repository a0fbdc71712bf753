//! Method-grouped protected-route tables.
//!
//! Entries keep declaration (or arrival) order; the first matching entry
//! decides the enforcement tier for a request.

use std::collections::HashMap;
use std::fmt;

use crate::routing::matcher::PathPattern;

/// Enforcement tier attached to a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Protect,
    Strict,
    Private,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Protect => "protect",
            Tier::Strict => "strict",
            Tier::Private => "private",
        }
    }

    /// Tier named by a handshake entry.
    ///
    /// Only `strict` is honoured; everything else, including `private`,
    /// becomes `protect`. Private routes are declared on the gateway itself.
    pub fn from_handshake(value: &str) -> Self {
        if value.eq_ignore_ascii_case("strict") {
            Tier::Strict
        } else {
            Tier::Protect
        }
    }

    /// Tier named in gateway configuration.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "protect" => Some(Tier::Protect),
            "strict" => Some(Tier::Strict),
            "private" => Some(Tier::Private),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled protected-route entry.
#[derive(Debug, Clone)]
pub struct ProtectedRoute {
    pub pattern: PathPattern,
    pub tier: Tier,
}

/// Protected routes grouped by HTTP method.
#[derive(Debug, Clone, Default)]
pub struct ProtectedRoutes {
    by_method: HashMap<String, Vec<ProtectedRoute>>,
}

impl ProtectedRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, method: &str, pattern: PathPattern, tier: Tier) {
        self.by_method
            .entry(method.to_ascii_uppercase())
            .or_default()
            .push(ProtectedRoute { pattern, tier });
    }

    /// Append every entry of `other` after the existing ones.
    pub fn extend(&mut self, other: &ProtectedRoutes) {
        for (method, routes) in &other.by_method {
            self.by_method
                .entry(method.clone())
                .or_default()
                .extend(routes.iter().cloned());
        }
    }

    /// Tier of the first entry matching `path`, if any.
    pub fn classify(&self, method: &str, path: &str) -> Option<Tier> {
        let routes = match self.by_method.get(method) {
            Some(routes) => routes,
            None => self.by_method.get(&method.to_ascii_uppercase())?,
        };
        routes
            .iter()
            .find(|route| route.pattern.is_match(path))
            .map(|route| route.tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProtectedRoute])> {
        self.by_method
            .iter()
            .map(|(method, routes)| (method.as_str(), routes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_method.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let mut routes = ProtectedRoutes::new();
        routes.push("GET", PathPattern::compile("/items/{id}").unwrap(), Tier::Strict);
        routes.push("GET", PathPattern::from_regex("^/items/.*$").unwrap(), Tier::Protect);

        assert_eq!(routes.classify("GET", "/items/9"), Some(Tier::Strict));
        assert_eq!(routes.classify("GET", "/items/9/x"), Some(Tier::Protect));
        assert_eq!(routes.classify("POST", "/items/9"), None);
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn test_handshake_tier_defaults_to_protect() {
        assert_eq!(Tier::from_handshake("strict"), Tier::Strict);
        assert_eq!(Tier::from_handshake("STRICT"), Tier::Strict);
        assert_eq!(Tier::from_handshake(""), Tier::Protect);
        assert_eq!(Tier::from_handshake("protect"), Tier::Protect);
        assert_eq!(Tier::from_handshake("private"), Tier::Protect);
    }

    #[test]
    fn test_extend_appends_after_existing() {
        let mut first = ProtectedRoutes::new();
        first.push("GET", PathPattern::compile("/a").unwrap(), Tier::Private);
        let mut second = ProtectedRoutes::new();
        second.push("get", PathPattern::compile("/a").unwrap(), Tier::Protect);

        first.extend(&second);
        assert_eq!(first.classify("GET", "/a"), Some(Tier::Private));
        assert_eq!(first.len(), 2);
    }
}
