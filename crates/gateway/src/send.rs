//! Outbound messages: validate, check the session, forward to the backend.

use std::sync::Arc;

use {
    courier_channels::{Backend, ProviderMessageId},
    tracing::{debug, warn},
};

use crate::session::SessionMachine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub to: String,
    pub body: String,
}

impl SendRequest {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidRequest,
    NotConnected,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NotConnected => "not_connected",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent { provider_message_id: ProviderMessageId },
    Rejected { reason: RejectReason },
    BackendError { detail: String },
}

/// Stateless with respect to the session: it only reads snapshots.
#[derive(Clone)]
pub struct SendCoordinator {
    session: Arc<SessionMachine>,
    backend: Arc<dyn Backend>,
}

impl SendCoordinator {
    pub fn new(session: Arc<SessionMachine>, backend: Arc<dyn Backend>) -> Self {
        Self { session, backend }
    }

    pub async fn send(&self, request: &SendRequest) -> SendResult {
        if request.to.trim().is_empty() || request.body.trim().is_empty() {
            return SendResult::Rejected {
                reason: RejectReason::InvalidRequest,
            };
        }

        let state = self.session.snapshot();
        if !state.is_connected() {
            debug!(phase = %state.phase(), "send rejected, session not connected");
            return SendResult::Rejected {
                reason: RejectReason::NotConnected,
            };
        }

        match self.backend.send_message(&request.to, &request.body).await {
            Ok(id) => {
                debug!(to = %request.to, message_id = %id, "message sent");
                SendResult::Sent {
                    provider_message_id: id,
                }
            },
            Err(e) => {
                warn!(to = %request.to, error = %e, "backend send failed");
                SendResult::BackendError {
                    detail: e.to_string(),
                }
            },
        }
    }
}
