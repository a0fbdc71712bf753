//! Gateway core: the mount table and the controller that keeps it current.
//!
//! # Data Flow
//! ```text
//! Directory snapshot + watch stream
//!     → controller.rs (one build task per descriptor)
//!     → Connector (dial, handshake, verify)
//!     → forwarder.rs (mount, replacing and stopping any previous entry)
//!     → HTTP pipeline resolves the first path segment against the table
//! ```

pub mod controller;
pub mod forwarder;

pub use controller::{build_and_mount, RegistrationController};
pub use forwarder::Forwarder;
