//! Config schema types (server, session, whatsapp).

use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    serde::Deserialize,
};

/// Graph API root used when no `whatsapp.api_url` is configured.
pub const DEFAULT_API_URL: &str = "https://graph.facebook.com/v17.0";

/// Simulated link delay; shorter than the default pairing window.
pub const DEFAULT_SIMULATE_LINK_AFTER_SECS: u64 = 5;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub whatsapp: WhatsAppConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Session lifecycle and fan-out tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a pairing attempt may stay unlinked before it expires.
    pub pairing_window_secs: u64,
    /// Bounded outbox size of each status subscriber.
    pub outbox_capacity: usize,
    /// How long `/connect` waits for a pairing artifact before replying.
    pub connect_wait_ms: u64,
    /// Request a connect as soon as the gateway starts.
    pub auto_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pairing_window_secs: 60,
            outbox_capacity: courier_protocol::DEFAULT_OUTBOX_CAPACITY,
            connect_wait_ms: 2_000,
            auto_connect: true,
        }
    }
}

impl SessionConfig {
    pub fn pairing_window(&self) -> Duration {
        Duration::from_secs(self.pairing_window_secs)
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }
}

/// WhatsApp Cloud API credentials and client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub access_token: Option<SecretString>,
    pub phone_id: Option<String>,
    pub request_timeout_secs: u64,
    /// Simulator only: emit `Connected` this long after the pairing code.
    /// `0` keeps the simulated session in pairing until the window closes.
    pub simulate_link_after_secs: Option<u64>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            access_token: None,
            phone_id: None,
            request_timeout_secs: 30,
            simulate_link_after_secs: Some(DEFAULT_SIMULATE_LINK_AFTER_SECS),
        }
    }
}

impl WhatsAppConfig {
    pub fn has_token(&self) -> bool {
        self.access_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().trim().is_empty())
    }

    pub fn has_phone_id(&self) -> bool {
        self.phone_id.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    /// Both credentials are present, so the Cloud API backend can be used.
    pub fn is_configured(&self) -> bool {
        self.has_token() && self.has_phone_id()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn simulate_link_after(&self) -> Option<Duration> {
        self.simulate_link_after_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
