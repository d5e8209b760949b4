//! Deterministic in-memory backend for tests.
//!
//! Events are injected by the test with [`MockBackend::emit`]; connect,
//! disconnect and send outcomes can be scripted ahead of time.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use {async_trait::async_trait, tokio::sync::mpsc, tokio_stream::wrappers::UnboundedReceiverStream};

use crate::backend::{Backend, BackendError, BackendEvent, BackendEventStream, ProviderMessageId};

#[derive(Default)]
struct Script {
    events: Option<mpsc::UnboundedSender<BackendEvent>>,
    on_connect: Vec<BackendEvent>,
    connect_error: Option<BackendError>,
    disconnect_error: Option<BackendError>,
    send_error: Option<BackendError>,
    sent: Vec<(String, String)>,
}

/// Scriptable backend double.
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful connect immediately yields these events.
    pub fn with_connect_events(self, events: Vec<BackendEvent>) -> Self {
        self.script().on_connect = events;
        self
    }

    /// The next `connect()` call fails with `err`.
    pub fn fail_next_connect(&self, err: BackendError) {
        self.script().connect_error = Some(err);
    }

    /// The next `disconnect()` call fails with `err`.
    pub fn fail_next_disconnect(&self, err: BackendError) {
        self.script().disconnect_error = Some(err);
    }

    /// All sends fail with `err` until cleared with `None`.
    pub fn fail_sends(&self, err: Option<BackendError>) {
        self.script().send_error = err;
    }

    /// Push an event onto the live connection's stream. Returns false when no
    /// connection is open.
    pub fn emit(&self, event: BackendEvent) -> bool {
        self.script()
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// End the live connection's stream without emitting anything.
    pub fn end_stream(&self) {
        self.script().events = None;
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// `(to, body)` of every send that reached the backend.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.script().sent.clone()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<BackendEventStream, BackendError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        if let Some(err) = script.connect_error.take() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &script.on_connect {
            let _ = tx.send(event.clone());
        }
        script.events = Some(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        script.events = None;
        match script.disconnect_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<ProviderMessageId, BackendError> {
        let mut script = self.script();
        script.sent.push((to.to_string(), body.to_string()));
        if let Some(err) = &script.send_error {
            return Err(err.clone());
        }
        Ok(ProviderMessageId(format!("mock-{}", script.sent.len())))
    }
}
