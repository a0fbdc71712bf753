//! Route registration and dispatch for backend services.
//!
//! # Responsibilities
//! - Store compiled routes per method in registration order
//! - Dispatch a method + path to the first matching handler
//! - Record protection tiers for registered routes
//!
//! # Design Decisions
//! - Duplicate compiled patterns are rejected at registration time
//! - Explicit `NotFound` rather than a silent default
//! - Tier entries live apart from the dispatch table; they are what a
//!   backend advertises in its handshake

use std::collections::HashMap;

use crate::error::{GatewayError, GatewayResult};
use crate::routing::matcher::PathPattern;
use crate::routing::protected::{ProtectedRoutes, Tier};

/// Handle to a registered route, used to attach protection tiers.
#[derive(Debug, Clone)]
pub struct RouteRef {
    method: String,
    pattern: PathPattern,
}

impl RouteRef {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }
}

#[derive(Debug)]
struct Route<H> {
    pattern: PathPattern,
    handler: H,
}

/// Outcome of a dispatch lookup.
#[derive(Debug)]
pub enum RouteMatch<'a, H> {
    Found {
        handler: &'a H,
        params: HashMap<String, String>,
    },
    NotFound,
}

/// Pattern router generic over the handler type.
#[derive(Debug)]
pub struct Router<H> {
    routes: HashMap<String, Vec<Route<H>>>,
    protected: ProtectedRoutes,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            protected: ProtectedRoutes::new(),
        }
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Fails on a malformed template or a duplicate route.
    pub fn register(&mut self, method: &str, template: &str, handler: H) -> GatewayResult<RouteRef> {
        let method = method.to_ascii_uppercase();
        let pattern = PathPattern::compile(template)?;

        let routes = self.routes.entry(method.clone()).or_default();
        if routes.iter().any(|r| r.pattern.as_str() == pattern.as_str()) {
            return Err(GatewayError::RouteConflict {
                method,
                pattern: pattern.as_str().to_string(),
            });
        }

        routes.push(Route {
            pattern: pattern.clone(),
            handler,
        });
        Ok(RouteRef { method, pattern })
    }

    pub fn get(&mut self, template: &str, handler: H) -> GatewayResult<RouteRef> {
        self.register("GET", template, handler)
    }

    pub fn post(&mut self, template: &str, handler: H) -> GatewayResult<RouteRef> {
        self.register("POST", template, handler)
    }

    pub fn put(&mut self, template: &str, handler: H) -> GatewayResult<RouteRef> {
        self.register("PUT", template, handler)
    }

    pub fn delete(&mut self, template: &str, handler: H) -> GatewayResult<RouteRef> {
        self.register("DELETE", template, handler)
    }

    pub fn protect(&mut self, routes: &[RouteRef]) {
        self.attach(routes, Tier::Protect);
    }

    pub fn strict(&mut self, routes: &[RouteRef]) {
        self.attach(routes, Tier::Strict);
    }

    pub fn private(&mut self, routes: &[RouteRef]) {
        self.attach(routes, Tier::Private);
    }

    fn attach(&mut self, routes: &[RouteRef], tier: Tier) {
        for route in routes {
            self.protected.push(&route.method, route.pattern.clone(), tier);
        }
    }

    pub fn protected_routes(&self) -> &ProtectedRoutes {
        &self.protected
    }

    /// Find the first route for `method` matching `path`.
    pub fn dispatch(&self, method: &str, path: &str) -> RouteMatch<'_, H> {
        let Some(routes) = self.routes.get(&method.to_ascii_uppercase()) else {
            return RouteMatch::NotFound;
        };

        for route in routes {
            if let Some(params) = route.pattern.captures(path) {
                return RouteMatch::Found {
                    handler: &route.handler,
                    params,
                };
            }
        }
        RouteMatch::NotFound
    }
}
