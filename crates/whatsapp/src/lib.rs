//! WhatsApp backends.
//!
//! - [`CloudApiBackend`] talks to the WhatsApp Business Cloud API (Graph API).
//! - [`SimulatorBackend`] fakes the pairing flow locally; used when no
//!   credentials are configured.

pub mod cloud;
pub mod phone;
pub mod simulator;

use std::sync::Arc;

use {courier_channels::Backend, courier_config::WhatsAppConfig, tracing::warn};

pub use {cloud::CloudApiBackend, simulator::SimulatorBackend};

/// Pick the backend for `config`: the Cloud API when both credentials are
/// present, otherwise the simulator.
pub fn backend_from_config(config: &WhatsAppConfig) -> Arc<dyn Backend> {
    if config.is_configured() {
        match CloudApiBackend::from_config(config) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => warn!(error = %e, "cloud api backend unavailable, using simulation mode"),
        }
    } else {
        let mut missing = Vec::new();
        if !config.has_token() {
            missing.push("WHATSAPP_TOKEN");
        }
        if !config.has_phone_id() {
            missing.push("WHATSAPP_PHONE_ID");
        }
        warn!(missing = %missing.join(", "), "whatsapp credentials not set, using simulation mode");
    }
    Arc::new(SimulatorBackend::new(config.simulate_link_after()))
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn unconfigured_uses_simulator() {
        let backend = backend_from_config(&WhatsAppConfig::default());
        assert_eq!(backend.name(), "simulation");
    }

    #[test]
    fn configured_uses_cloud_api() {
        let config = WhatsAppConfig {
            access_token: Some(SecretString::new("tok".into())),
            phone_id: Some("1234".into()),
            ..Default::default()
        };
        let backend = backend_from_config(&config);
        assert_eq!(backend.name(), "cloud_api");
    }
}
