//! Composite connections: one live, validated binding per backend.
//!
//! # Data Flow
//! ```text
//! ServiceDescriptor
//!     → connector.rs (dial, handshake, checksum check, route-table parse)
//!     → connection.rs (CompositeConnection: key, mount path, transport, routes)
//!     → Forwarder mount table
//! ```
//!
//! # Design Decisions
//! - Plain HTTP backends become ready immediately, without a handshake
//! - A connection that fails verification is closed, never mounted
//! - The `private` tier only comes from gateway-side static routes

pub mod connection;
pub mod connector;

pub use connection::{CompositeConnection, RouteClass, Transport};
pub use connector::{ConnectState, Connector, StaticRoutes};
