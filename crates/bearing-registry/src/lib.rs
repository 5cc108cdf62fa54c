//! Registry client for the gateway.
//!
//! [`RegistryClient`] keeps the latest [`RegistrySnapshot`] in memory and
//! refreshes it in the background; [`HttpRegistrySource`] fetches listings
//! from a registry endpoint over HTTP.
//!
//! [`RegistrySnapshot`]: bearing_core::RegistrySnapshot

mod client;
mod source;

pub use client::{backoff_delay, RegistryClient, RegistryConfig};
pub use source::{parse_eureka, parse_flat, HttpRegistrySource, RegistryFormat};
