//! ESI HTTP client.
//!
//! Only public reference endpoints are used, so no authentication is involved.

pub mod client;

pub use client::{EsiClient, EsiClientConfig};
