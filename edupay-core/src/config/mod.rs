//! Configuration types for edupay.
//!
//! These types represent the validated runtime configuration used by the
//! server and the strategies. Loading and parsing the TOML file is handled
//! by the server crate.

mod collaborators;
mod gateway;
mod providers;
mod settlement;

pub use collaborators::CollaboratorsConfig;
pub use gateway::GatewayConfig;
pub use providers::{KashierConfig, KashierMode, PayPalConfig, PaymobConfig, ProvidersConfig};
pub use settlement::{SettlementConfig, TimeoutsConfig};
