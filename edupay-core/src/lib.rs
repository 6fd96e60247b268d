#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod collaborators;
pub mod config;
pub mod entities;
pub mod error;
pub mod framework;
pub mod orchestrator;
pub mod registry;
pub mod settlement;
pub mod store;
pub mod strategies;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
