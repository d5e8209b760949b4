//! WhatsApp Business Cloud API backend.
//!
//! The Cloud API has no device pairing: credentials are verified on connect
//! and the session is linked right away. The connection's event stream stays
//! open until `disconnect()`, or until a send finds the token revoked.

use std::sync::{Mutex, MutexGuard, PoisonError};

use {
    async_trait::async_trait,
    courier_channels::{Backend, BackendError, BackendEvent, BackendEventStream, ProviderMessageId},
    courier_config::WhatsAppConfig,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::phone::normalize_recipient;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TextMessage<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct SendReply {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Deserialize)]
struct GraphErrorReply {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

// ── Backend ──────────────────────────────────────────────────────────────────

struct LiveConnection {
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<BackendEvent>,
}

pub struct CloudApiBackend {
    client: reqwest::Client,
    api_url: String,
    phone_id: String,
    token: SecretString,
    live: Mutex<Option<LiveConnection>>,
}

impl CloudApiBackend {
    pub fn new(
        api_url: impl Into<String>,
        phone_id: impl Into<String>,
        token: SecretString,
        timeout: std::time::Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            phone_id: phone_id.into(),
            token,
            live: Mutex::new(None),
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, BackendError> {
        let (Some(token), Some(phone_id)) = (&config.access_token, &config.phone_id) else {
            return Err(BackendError::Unavailable(
                "WHATSAPP_TOKEN and WHATSAPP_PHONE_ID are required".into(),
            ));
        };
        Self::new(
            config.api_url.clone(),
            phone_id.trim(),
            token.clone(),
            config.request_timeout(),
        )
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveConnection>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tell the live connection (if any) that the token no longer works.
    fn signal_logged_out(&self) {
        if let Some(live) = self.live().as_ref() {
            let _ = live.events.send(BackendEvent::LoggedOut);
        }
    }
}

async fn error_from_response(resp: reqwest::Response) -> BackendError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<GraphErrorReply>(&body)
        .map(|r| r.error.message)
        .unwrap_or(body);
    match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized(detail),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited,
        _ => BackendError::Api {
            status: status.as_u16(),
            detail,
        },
    }
}

fn network_error(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

#[async_trait]
impl Backend for CloudApiBackend {
    fn name(&self) -> &str {
        "cloud_api"
    }

    async fn connect(&self) -> Result<BackendEventStream, BackendError> {
        let url = format!("{}/{}", self.api_url, self.phone_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(network_error)?;
        if !resp.status().is_success() {
            let err = error_from_response(resp).await;
            warn!(error = %err, "cloud api credential check failed");
            return Err(err);
        }
        info!(phone_id = %self.phone_id, "cloud api credentials verified");

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.live().replace(LiveConnection {
            cancel: cancel.clone(),
            events: tx,
        }) {
            previous.cancel.cancel();
        }

        Ok(Box::pin(async_stream::stream! {
            yield BackendEvent::Connected;
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => None,
                    event = rx.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                let last = !matches!(event, BackendEvent::PairingCodeReady(_));
                yield event;
                if last {
                    break;
                }
            }
        }))
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        if let Some(live) = self.live().take() {
            live.cancel.cancel();
            debug!("cloud api connection closed");
        }
        Ok(())
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderMessageId, BackendError> {
        let phone = normalize_recipient(to)?;
        let url = format!("{}/{}/messages", self.api_url, self.phone_id);
        let payload = TextMessage {
            messaging_product: "whatsapp",
            to: &phone,
            kind: "text",
            text: TextBody { body },
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(network_error)?;

        if !resp.status().is_success() {
            let err = error_from_response(resp).await;
            if matches!(err, BackendError::Unauthorized(_)) {
                self.signal_logged_out();
            }
            return Err(err);
        }

        let reply: SendReply = resp.json().await.map_err(network_error)?;
        let id = reply
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| BackendError::Api {
                status: 200,
                detail: "response carried no message id".into(),
            })?;
        info!(to = %phone, message_id = %id, "whatsapp message sent");
        Ok(ProviderMessageId(id))
    }
}
