//! Application detectors
//!
//! Framework infrastructure (detector contract, registry, configuration)
//! plus the protocol plug-ins. Each plug-in lives in its own submodule and
//! exposes `registration()` functions the framework feeds to
//! [`DetectorRegistry::register`].

pub mod pop3;
pub mod registry;
pub mod traits;

pub use registry::{
    AppEntry, DetectorRegistration, DetectorRegistry, APPINFO_CLIENT_USER,
    APPINFO_SERVICE_ADDITIONAL,
};
pub use traits::{DetectorKind, DetectorStatus, FlowDetector, ValidateArgs};

use serde::{Deserialize, Serialize};

/// POP3 detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pop3Config {
    pub enabled: bool,
    pub ports: Vec<u16>,
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            enabled: true,
            ports: vec![pop3::POP3_PORT],
        }
    }
}

/// Configuration for application discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub pop3: Pop3Config,
}

/// Initialize a registry with all enabled detectors
pub fn init_registry(config: &DiscoveryConfig) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();

    if config.pop3.enabled {
        registry.register(pop3::client_registration());
        registry.register(pop3::service_registration());
    }

    registry
}
