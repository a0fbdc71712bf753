//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, cross-cutting layers, base path)
//!     → request.rs (request ID, span, original URI)
//!     → pipeline.rs (agent → service → authorization)
//!     → forward.rs (HTTP proxy or RPC dispatch, realip.rs for the client address)
//!     → response.rs (standard envelope, JSON or XML)
//!     → Send to client
//! ```

pub mod forward;
pub mod pipeline;
pub mod realip;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{Envelope, GatewayMessage};
pub use server::{GatewayServer, GatewayState};
