//! Resilience helpers.
//!
//! # Design Decisions
//! - Backend dialing retries on a fixed, bounded schedule
//! - Inbound requests are bounded by the blanket request timeout layer

pub mod backoff;

pub use backoff::{connect_backoff, MAX_CONNECT_ATTEMPTS};
