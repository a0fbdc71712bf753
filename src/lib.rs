//! API gateway library.
//!
//! Backends describe themselves in a service directory; the gateway watches
//! it, builds a verified connection per backend and forwards
//! `/{service}/...` requests to it after tier-based authorization.

pub mod auth;
pub mod composite;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod rpc;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Forwarder, RegistrationController};
pub use http::{GatewayServer, GatewayState};
pub use lifecycle::Shutdown;
