//! Runtime configuration types.
//!
//! Provider, collaborator and settlement settings are defined in
//! `edupay_core::config` and re-exported here.

use std::net::SocketAddr;

pub use edupay_core::config::{
    CollaboratorsConfig, GatewayConfig, KashierConfig, KashierMode, PayPalConfig, PaymobConfig,
    ProvidersConfig, SettlementConfig, TimeoutsConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}
