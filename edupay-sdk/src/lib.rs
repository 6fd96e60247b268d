//! Shared types for the edupay payment settlement service.
//!
//! The objects in this crate are the wire format spoken between the
//! platform backend, the settlement server and the provider strategies.
//! Enable the `client` feature for a typed HTTP client of the gateway API.

#![forbid(unsafe_code)]

#[cfg(feature = "client")]
pub mod client;
pub mod objects;
pub mod signature;
