use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    courier_channels::Backend,
    courier_config::{CourierConfig, WhatsAppConfig},
};

use crate::{
    send::SendCoordinator,
    session::{SessionMachine, SessionOptions},
};

// ── Backend info ─────────────────────────────────────────────────────────────

/// What `/status` and `/health` report about the backend.
#[derive(Debug, Clone, Default)]
pub struct BackendInfo {
    pub name: String,
    pub configured: bool,
    pub has_token: bool,
    pub has_phone_id: bool,
}

impl BackendInfo {
    pub fn new(backend: &dyn Backend, config: &WhatsAppConfig) -> Self {
        Self {
            name: backend.name().to_string(),
            configured: config.is_configured(),
            has_token: config.has_token(),
            has_phone_id: config.has_phone_id(),
        }
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub session: SessionOptions,
    /// How long `/connect` waits for a pairing code before answering.
    pub connect_wait: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&CourierConfig::default())
    }
}

impl From<&CourierConfig> for GatewayOptions {
    fn from(config: &CourierConfig) -> Self {
        Self {
            session: SessionOptions::from(&config.session),
            connect_wait: config.session.connect_wait(),
        }
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// The single WhatsApp session.
    pub session: Arc<SessionMachine>,
    pub sender: SendCoordinator,
    pub backend: BackendInfo,
    pub connect_wait: Duration,
    /// Server version string.
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(backend: Arc<dyn Backend>, info: BackendInfo, options: GatewayOptions) -> Arc<Self> {
        let session = SessionMachine::new(Arc::clone(&backend), options.session);
        let sender = SendCoordinator::new(Arc::clone(&session), backend);
        Arc::new(Self {
            session,
            sender,
            backend: info,
            connect_wait: options.connect_wait,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.session.hub().subscriber_count()
    }
}
