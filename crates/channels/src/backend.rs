use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::Stream,
    serde::{Deserialize, Serialize},
};

/// Lifecycle notification emitted by a backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The session is linked and ready to send.
    Connected,
    /// The transport dropped; the session may be re-established later.
    Disconnected,
    /// The linked device was removed or the credentials were revoked.
    LoggedOut,
    /// A new pairing artifact (QR payload or linking code) is ready to show.
    PairingCodeReady(String),
    /// The backend hit an error it cannot recover from on its own.
    Failed(String),
}

/// Events of one backend connection, in the order the backend observed them.
pub type BackendEventStream = Pin<Box<dyn Stream<Item = BackendEvent> + Send>>;

/// Message id assigned by the messaging provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderMessageId(pub String);

impl ProviderMessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Adapter-level failure (network, auth, rate limit, provider rejection).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("provider returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A messaging backend. Implementations must be cheap to share behind an `Arc`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend identifier (e.g. "cloud_api", "simulation").
    fn name(&self) -> &str;

    /// Open a session connection. The returned stream carries the lifecycle
    /// events of that connection and ends when the connection is gone.
    async fn connect(&self) -> Result<BackendEventStream, BackendError>;

    /// Tear down the current connection, if any.
    async fn disconnect(&self) -> Result<(), BackendError>;

    /// Send a text message to a phone identifier.
    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderMessageId, BackendError>;
}
