//! Local stand-in for a phone-linked session.
//!
//! Each connect hands out a fresh linking code. With `link_after` set, the
//! simulator pretends the user entered the code after that delay; otherwise
//! the code just sits there until the pairing window closes.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    async_trait::async_trait,
    courier_channels::{Backend, BackendError, BackendEvent, BackendEventStream, ProviderMessageId},
    rand::Rng,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::phone::normalize_recipient;

/// Unambiguous characters for linking codes (no 0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random `XXXX-XXXX` linking code.
pub fn pairing_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(9);
    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        let idx = rng.random_range(0..CODE_ALPHABET.len());
        code.push(char::from(CODE_ALPHABET[idx]));
    }
    code
}

pub struct SimulatorBackend {
    link_after: Option<Duration>,
    live: Mutex<Option<CancellationToken>>,
}

impl SimulatorBackend {
    pub fn new(link_after: Option<Duration>) -> Self {
        Self {
            link_after,
            live: Mutex::new(None),
        }
    }

    fn live(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for SimulatorBackend {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn connect(&self) -> Result<BackendEventStream, BackendError> {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.live().replace(cancel.clone()) {
            previous.cancel();
        }
        let code = pairing_code();
        let link_after = self.link_after;
        info!(code = %code, "simulated pairing code issued");

        Ok(Box::pin(async_stream::stream! {
            yield BackendEvent::PairingCodeReady(code);
            if let Some(delay) = link_after {
                let linked = tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                };
                if !linked {
                    return;
                }
                yield BackendEvent::Connected;
            }
            cancel.cancelled().await;
        }))
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        if let Some(cancel) = self.live().take() {
            cancel.cancel();
            debug!("simulated connection closed");
        }
        Ok(())
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderMessageId, BackendError> {
        let phone = normalize_recipient(to)?;
        let id = format!("sim-{}", uuid::Uuid::new_v4());
        info!(to = %phone, len = body.len(), message_id = %id, "simulated message send");
        Ok(ProviderMessageId(id))
    }
}
