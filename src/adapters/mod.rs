//! Adapters Layer
//!
//! Inbound adapters expose the HTTP surface; outbound adapters implement
//! the storage ports.

pub mod inbound;
pub mod outbound;
