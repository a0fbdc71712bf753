//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Backend startup:
//!     template ("/users/{id}")
//!     → matcher.rs (compile to anchored pattern)
//!     → router.rs (dispatch table + tier declarations)
//!     → handshake (protected-route table)
//!
//! Gateway:
//!     handshake pattern strings
//!     → matcher.rs (wrap raw patterns)
//!     → protected.rs (method-grouped table, first match wins)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at registration, immutable afterwards
//! - Deterministic: same input always matches same route
//! - Configuration errors surface at registration, never per request

pub mod matcher;
pub mod protected;
pub mod router;

pub use matcher::PathPattern;
pub use protected::{ProtectedRoute, ProtectedRoutes, Tier};
pub use router::{RouteMatch, RouteRef, Router};
