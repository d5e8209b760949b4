//! Session lifecycle state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Pairing ──Connected──▶ Connected
//!      ▲                    │  ▲  │                   │
//!      │                    │  └──┘ PairingCodeReady  │
//!      ├──window expired────┘                         │
//!      ├──LoggedOut (Pairing)                         │
//!      ├──disconnect (Pairing or Connected)───────────┤
//!      └──Disconnected / LoggedOut / stream end───────┘
//!
//! any ──backend failure──▶ Errored ──connect──▶ Pairing
//! ```
//!
//! Transitions run under one mutex and publish their status event before the
//! lock is released, so the hub sees events in transition order. Readers go
//! through a watch channel and always get a whole `SessionState`.
//!
//! Every connect attempt gets a number. The event pump and the pairing timer
//! carry the number of the attempt that started them, and anything they
//! report after that attempt has ended is ignored.

use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    courier_channels::{Backend, BackendEvent, BackendEventStream},
    courier_config::SessionConfig,
    courier_protocol::{Phase, StatusEvent},
    futures::StreamExt,
    tokio::{
        sync::{Mutex as AsyncMutex, watch},
        task::AbortHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    broadcast::{StatusHub, Subscription},
    pairing::PairingTimer,
};

// ── State ────────────────────────────────────────────────────────────────────

/// Phase plus the data that only exists in that phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Pairing { artifact: Option<String> },
    Connected,
    Errored { detail: String },
}

impl SessionStatus {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Disconnected => Phase::Disconnected,
            Self::Pairing { .. } => Phase::Pairing,
            Self::Connected => Phase::Connected,
            Self::Errored { .. } => Phase::Errored,
        }
    }
}

/// Immutable snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    status: SessionStatus,
    last_transition_at: DateTime<Utc>,
}

impl SessionState {
    fn new(status: SessionStatus) -> Self {
        Self {
            status,
            last_transition_at: Utc::now(),
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn phase(&self) -> Phase {
        self.status.phase()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.status, SessionStatus::Connected)
    }

    pub fn pairing_artifact(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::Pairing { artifact } => artifact.as_deref(),
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::Errored { detail } => Some(detail),
            _ => None,
        }
    }

    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.last_transition_at
    }

    pub fn to_event(&self) -> StatusEvent {
        StatusEvent {
            phase: self.phase(),
            pairing_artifact: self.pairing_artifact().map(str::to_owned),
            error_detail: self.error_detail().map(str::to_owned),
            timestamp: self.last_transition_at,
        }
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub pairing_window: Duration,
    pub outbox_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            pairing_window: config.pairing_window(),
            outbox_capacity: config.outbox_capacity,
        }
    }
}

// ── Machine ──────────────────────────────────────────────────────────────────

struct Machine {
    state: SessionState,
    /// Number of the latest connect attempt.
    attempt: u64,
    /// Attempt that currently owns the session (Pairing or Connected).
    active: Option<u64>,
    pump: Option<AbortHandle>,
    timer: Option<PairingTimer>,
}

impl Machine {
    fn owns(&self, attempt: u64) -> bool {
        self.active == Some(attempt)
    }

    /// Detach the active attempt: stop its pump and pairing timer.
    fn end_attempt(&mut self) {
        self.active = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.timer = None;
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.end_attempt();
    }
}

/// Owner of the single session. Share it behind an `Arc`.
pub struct SessionMachine {
    backend: Arc<dyn Backend>,
    hub: Arc<StatusHub>,
    pairing_window: Duration,
    machine: Mutex<Machine>,
    /// Serializes connect/disconnect requests, which await the backend.
    commands: AsyncMutex<()>,
    snapshot: watch::Sender<SessionState>,
}

impl SessionMachine {
    pub fn new(backend: Arc<dyn Backend>, options: SessionOptions) -> Arc<Self> {
        let initial = SessionState::new(SessionStatus::Disconnected);
        let hub = StatusHub::new(initial.to_event(), options.outbox_capacity);
        let (snapshot, _) = watch::channel(initial.clone());
        Arc::new(Self {
            backend,
            hub,
            pairing_window: options.pairing_window,
            machine: Mutex::new(Machine {
                state: initial,
                attempt: 0,
                active: None,
                pump: None,
                timer: None,
            }),
            commands: AsyncMutex::new(()),
            snapshot,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. Never blocks on an in-flight transition.
    pub fn snapshot(&self) -> SessionState {
        self.snapshot.borrow().clone()
    }

    /// Register a status subscriber; its first frame is the current state.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &Arc<StatusHub> {
        &self.hub
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Wait until `ready` holds for the current state or `timeout` passes, and
    /// return the state at that point.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        let mut rx = self.snapshot.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|s| ready(s)))
            .await
            .is_ok();
        if !reached {
            debug!(?timeout, "session wait timed out");
        }
        self.snapshot()
    }

    /// Apply a transition and publish it. Caller holds the machine lock.
    fn transition(&self, machine: &mut Machine, status: SessionStatus) {
        let from = machine.state.phase();
        machine.state = SessionState::new(status);
        self.snapshot.send_replace(machine.state.clone());
        let seq = self.hub.publish(machine.state.to_event());
        info!(
            from = %from,
            to = %machine.state.phase(),
            seq,
            "session transition"
        );
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Start pairing from `Disconnected` or `Errored`. A no-op returning the
    /// current state while `Pairing` or `Connected`.
    pub async fn connect(self: &Arc<Self>) -> SessionState {
        let _command = self.commands.lock().await;

        let attempt = {
            let mut machine = self.lock();
            if matches!(
                machine.state.status,
                SessionStatus::Pairing { .. } | SessionStatus::Connected
            ) {
                debug!(phase = %machine.state.phase(), "connect ignored, session already active");
                return machine.state.clone();
            }
            machine.attempt += 1;
            let attempt = machine.attempt;
            machine.active = Some(attempt);
            self.transition(&mut machine, SessionStatus::Pairing { artifact: None });
            machine.timer = Some(self.arm_pairing_window(attempt));
            attempt
        };

        debug!(attempt, backend = self.backend.name(), "connecting backend");
        let result = self.backend.connect().await;

        let orphaned = {
            let mut machine = self.lock();
            match result {
                Ok(events) if machine.owns(attempt) => {
                    let pump = tokio::spawn(pump_events(Arc::downgrade(self), attempt, events));
                    machine.pump = Some(pump.abort_handle());
                    false
                },
                Ok(_) => true,
                Err(e) if machine.owns(attempt) => {
                    warn!(attempt, error = %e, "backend connect failed");
                    machine.end_attempt();
                    self.transition(&mut machine, SessionStatus::Errored {
                        detail: e.to_string(),
                    });
                    false
                },
                Err(e) => {
                    debug!(attempt, error = %e, "connect of ended attempt failed");
                    false
                },
            }
        };

        // The attempt ended (pairing window) while the backend was connecting.
        if orphaned {
            debug!(attempt, "dropping connection of ended attempt");
            if let Err(e) = self.backend.disconnect().await {
                debug!(error = %e, "backend disconnect of ended attempt failed");
            }
        }

        self.snapshot()
    }

    /// Leave `Pairing` or `Connected` and tell the backend to disconnect. A
    /// no-op in `Disconnected` and `Errored`.
    pub async fn disconnect(&self) -> SessionState {
        let _command = self.commands.lock().await;

        {
            let mut machine = self.lock();
            if !matches!(
                machine.state.status,
                SessionStatus::Pairing { .. } | SessionStatus::Connected
            ) {
                debug!(phase = %machine.state.phase(), "disconnect ignored, session not active");
                return machine.state.clone();
            }
            machine.end_attempt();
            self.transition(&mut machine, SessionStatus::Disconnected);
        }

        if let Err(e) = self.backend.disconnect().await {
            warn!(error = %e, "backend disconnect failed");
            let mut machine = self.lock();
            if machine.active.is_none() && machine.state.phase() == Phase::Disconnected {
                self.transition(&mut machine, SessionStatus::Errored {
                    detail: e.to_string(),
                });
            }
        }

        self.snapshot()
    }

    // ── Backend-driven transitions ──────────────────────────────────────────

    fn handle_event(&self, attempt: u64, event: BackendEvent) -> ControlFlow<()> {
        let mut machine = self.lock();
        if !machine.owns(attempt) {
            debug!(attempt, ?event, "ignoring event from ended attempt");
            return ControlFlow::Break(());
        }

        let current = machine.state.status.clone();
        match (current, event) {
            (SessionStatus::Pairing { artifact }, BackendEvent::PairingCodeReady(code)) => {
                if artifact.as_deref() != Some(code.as_str()) {
                    self.transition(&mut machine, SessionStatus::Pairing {
                        artifact: Some(code),
                    });
                }
            },
            (SessionStatus::Pairing { .. }, BackendEvent::Connected) => {
                if let Some(timer) = machine.timer.take() {
                    timer.cancel();
                }
                self.transition(&mut machine, SessionStatus::Connected);
            },
            (SessionStatus::Connected, event @ (BackendEvent::Disconnected | BackendEvent::LoggedOut)) => {
                info!(?event, "backend ended the session");
                machine.end_attempt();
                self.transition(&mut machine, SessionStatus::Disconnected);
                return ControlFlow::Break(());
            },
            (SessionStatus::Pairing { .. }, BackendEvent::LoggedOut) => {
                info!(attempt, "backend logged out while pairing");
                machine.end_attempt();
                self.transition(&mut machine, SessionStatus::Disconnected);
                return ControlFlow::Break(());
            },
            (_, BackendEvent::Failed(detail)) => {
                warn!(detail = %detail, "backend failed");
                machine.end_attempt();
                self.transition(&mut machine, SessionStatus::Errored { detail });
                return ControlFlow::Break(());
            },
            (status, event) => {
                debug!(phase = %status.phase(), ?event, "backend event does not apply");
            },
        }
        ControlFlow::Continue(())
    }

    fn backend_stream_ended(&self, attempt: u64) {
        let mut machine = self.lock();
        if !machine.owns(attempt) {
            return;
        }
        machine.pump = None;
        if machine.state.is_connected() {
            info!(attempt, "backend event stream ended");
            machine.end_attempt();
            self.transition(&mut machine, SessionStatus::Disconnected);
        } else {
            debug!(attempt, "backend event stream ended while pairing");
        }
    }

    fn arm_pairing_window(self: &Arc<Self>, attempt: u64) -> PairingTimer {
        let machine = Arc::downgrade(self);
        PairingTimer::arm(self.pairing_window, move || {
            if let Some(machine) = machine.upgrade() {
                machine.expire_pairing(attempt);
            }
        })
    }

    /// The pairing window closed: revert to `Disconnected` without issuing a
    /// new artifact.
    fn expire_pairing(self: &Arc<Self>, attempt: u64) {
        {
            let mut machine = self.lock();
            if !machine.owns(attempt) || machine.state.phase() != Phase::Pairing {
                return;
            }
            info!(attempt, window = ?self.pairing_window, "pairing window expired");
            machine.end_attempt();
            self.transition(&mut machine, SessionStatus::Disconnected);
        }

        // Runs as a command so it cannot interleave with a newer connect.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _command = this.commands.lock().await;
            let newer = this.lock().active.is_some();
            if newer {
                debug!(attempt, "newer attempt active, keeping backend connection");
                return;
            }
            if let Err(e) = this.backend.disconnect().await {
                debug!(error = %e, "backend disconnect after pairing expiry failed");
            }
        });
    }
}

async fn pump_events(machine: Weak<SessionMachine>, attempt: u64, mut events: BackendEventStream) {
    while let Some(event) = events.next().await {
        let Some(machine) = machine.upgrade() else {
            return;
        };
        if machine.handle_event(attempt, event).is_break() {
            return;
        }
    }
    if let Some(machine) = machine.upgrade() {
        machine.backend_stream_ended(attempt);
    }
}

#[cfg(test)]
mod tests {
    use courier_channels::{BackendError, mock::MockBackend};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn machine_with(backend: &Arc<MockBackend>, window: Duration) -> Arc<SessionMachine> {
        SessionMachine::new(Arc::clone(backend) as Arc<dyn Backend>, SessionOptions {
            pairing_window: window,
            outbox_capacity: 32,
        })
    }

    async fn next_phase(sub: &mut Subscription) -> (Phase, Option<String>) {
        let frame = tokio::time::timeout(WAIT, sub.recv())
            .await
            .unwrap()
            .unwrap();
        (frame.event.phase, frame.event.pairing_artifact)
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, WAIT);
        let state = machine.snapshot();
        assert_eq!(state.phase(), Phase::Disconnected);
        assert!(state.pairing_artifact().is_none());
        assert!(state.error_detail().is_none());
        assert_eq!(backend.connect_calls(), 0);
    }

    #[tokio::test]
    async fn pairing_then_connected_then_backend_disconnect() {
        let backend = Arc::new(
            MockBackend::new().with_connect_events(vec![BackendEvent::PairingCodeReady("A".into())]),
        );
        let machine = machine_with(&backend, Duration::from_secs(60));
        let mut sub = machine.subscribe();
        assert_eq!(next_phase(&mut sub).await, (Phase::Disconnected, None));

        let state = machine.connect().await;
        assert_eq!(state.phase(), Phase::Pairing);
        assert_eq!(next_phase(&mut sub).await, (Phase::Pairing, None));
        assert_eq!(
            next_phase(&mut sub).await,
            (Phase::Pairing, Some("A".into()))
        );
        assert_eq!(machine.snapshot().pairing_artifact(), Some("A"));

        backend.emit(BackendEvent::Connected);
        assert_eq!(next_phase(&mut sub).await, (Phase::Connected, None));
        assert!(machine.snapshot().pairing_artifact().is_none());

        backend.emit(BackendEvent::Disconnected);
        assert_eq!(next_phase(&mut sub).await, (Phase::Disconnected, None));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn repeated_connect_is_idempotent() {
        let backend = Arc::new(
            MockBackend::new().with_connect_events(vec![BackendEvent::PairingCodeReady("A".into())]),
        );
        let machine = machine_with(&backend, Duration::from_secs(60));
        let mut sub = machine.subscribe();
        next_phase(&mut sub).await;

        machine.connect().await;
        assert_eq!(next_phase(&mut sub).await, (Phase::Pairing, None));
        assert_eq!(
            next_phase(&mut sub).await,
            (Phase::Pairing, Some("A".into()))
        );

        let again = machine.connect().await;
        assert_eq!(again.pairing_artifact(), Some("A"));
        assert_eq!(backend.connect_calls(), 1);
        assert!(sub.try_recv().is_none());

        // The same artifact re-announced is not a change either.
        backend.emit(BackendEvent::PairingCodeReady("A".into()));
        backend.emit(BackendEvent::PairingCodeReady("B".into()));
        assert_eq!(
            next_phase(&mut sub).await,
            (Phase::Pairing, Some("B".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_window_expiry_reverts_to_disconnected() {
        let backend = Arc::new(
            MockBackend::new().with_connect_events(vec![BackendEvent::PairingCodeReady("A".into())]),
        );
        let machine = machine_with(&backend, Duration::from_secs(30));
        let mut sub = machine.subscribe();
        next_phase(&mut sub).await;

        machine.connect().await;
        next_phase(&mut sub).await;
        next_phase(&mut sub).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(next_phase(&mut sub).await, (Phase::Disconnected, None));
        assert!(sub.try_recv().is_none());
        assert_eq!(machine.snapshot().phase(), Phase::Disconnected);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.disconnect_calls(), 1);

        // Events of the expired attempt are ignored.
        backend.emit(BackendEvent::Connected);
        tokio::task::yield_now().await;
        assert_eq!(machine.snapshot().phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_event_cancels_pairing_window() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(30));
        machine.connect().await;
        backend.emit(BackendEvent::Connected);
        let state = machine.wait_for(WAIT, SessionState::is_connected).await;
        assert!(state.is_connected());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(machine.snapshot().is_connected());
        assert_eq!(backend.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn connect_failure_enters_errored_and_connect_recovers() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_connect(BackendError::Unauthorized("bad token".into()));
        let machine = machine_with(&backend, Duration::from_secs(60));

        let state = machine.connect().await;
        assert_eq!(state.phase(), Phase::Errored);
        assert_eq!(state.error_detail(), Some("unauthorized: bad token"));

        let mut sub = machine.subscribe();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.event.phase, Phase::Errored);
        assert_eq!(first.event.error_detail.as_deref(), Some("unauthorized: bad token"));

        let state = machine.connect().await;
        assert_eq!(state.phase(), Phase::Pairing);
        assert!(state.error_detail().is_none());
        assert_eq!(backend.connect_calls(), 2);
    }

    #[tokio::test]
    async fn failed_event_enters_errored() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        backend.emit(BackendEvent::Connected);
        machine.wait_for(WAIT, SessionState::is_connected).await;

        backend.emit(BackendEvent::Failed("stream error".into()));
        let state = machine
            .wait_for(WAIT, |s| s.phase() == Phase::Errored)
            .await;
        assert_eq!(state.error_detail(), Some("stream error"));
    }

    #[tokio::test]
    async fn logged_out_disconnects() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        backend.emit(BackendEvent::Connected);
        machine.wait_for(WAIT, SessionState::is_connected).await;

        backend.emit(BackendEvent::LoggedOut);
        let state = machine
            .wait_for(WAIT, |s| s.phase() == Phase::Disconnected)
            .await;
        assert_eq!(state.phase(), Phase::Disconnected);
    }

    #[tokio::test]
    async fn stream_end_while_connected_disconnects() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        backend.emit(BackendEvent::Connected);
        machine.wait_for(WAIT, SessionState::is_connected).await;

        backend.end_stream();
        let state = machine
            .wait_for(WAIT, |s| s.phase() == Phase::Disconnected)
            .await;
        assert_eq!(state.phase(), Phase::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_request_from_connected() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        backend.emit(BackendEvent::Connected);
        machine.wait_for(WAIT, SessionState::is_connected).await;

        let state = machine.disconnect().await;
        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(backend.disconnect_calls(), 1);

        // Already disconnected: nothing to do.
        let mut sub = machine.subscribe();
        sub.recv().await;
        machine.disconnect().await;
        assert_eq!(backend.disconnect_calls(), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn disconnect_request_cancels_pairing() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        assert_eq!(machine.disconnect().await.phase(), Phase::Disconnected);

        // The old connection's events no longer apply.
        backend.emit(BackendEvent::Connected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(machine.snapshot().phase(), Phase::Disconnected);
    }

    #[tokio::test]
    async fn backend_disconnect_failure_enters_errored() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;
        backend.fail_next_disconnect(BackendError::Network("reset".into()));

        let state = machine.disconnect().await;
        assert_eq!(state.phase(), Phase::Errored);
        assert_eq!(state.error_detail(), Some("network error: reset"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_torn_state() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));

        let reader = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move {
                for _ in 0..5_000 {
                    let s = machine.snapshot();
                    if s.pairing_artifact().is_some() {
                        assert_eq!(s.phase(), Phase::Pairing);
                    }
                    assert_eq!(s.error_detail().is_some(), s.phase() == Phase::Errored);
                    let ev = s.to_event();
                    assert_eq!(ev.phase, s.phase());
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..50 {
            machine.connect().await;
            backend.emit(BackendEvent::PairingCodeReady(format!("code-{i}")));
            backend.emit(BackendEvent::Connected);
            machine.wait_for(WAIT, SessionState::is_connected).await;
            machine.disconnect().await;
        }
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn logged_out_while_pairing_disconnects() {
        let backend = Arc::new(
            MockBackend::new().with_connect_events(vec![BackendEvent::PairingCodeReady("A".into())]),
        );
        let machine = machine_with(&backend, Duration::from_secs(60));
        let mut sub = machine.subscribe();
        next_phase(&mut sub).await;

        machine.connect().await;
        next_phase(&mut sub).await;
        next_phase(&mut sub).await;

        backend.emit(BackendEvent::LoggedOut);
        assert_eq!(next_phase(&mut sub).await, (Phase::Disconnected, None));
        assert!(sub.try_recv().is_none());

        // Reconnecting starts a fresh attempt.
        assert_eq!(machine.connect().await.phase(), Phase::Pairing);
        assert_eq!(backend.connect_calls(), 2);
    }

    #[tokio::test]
    async fn disconnected_event_while_pairing_is_ignored() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;

        backend.emit(BackendEvent::Disconnected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(machine.snapshot().phase(), Phase::Pairing);
    }

    #[tokio::test]
    async fn expiry_disconnect_spares_newer_attempt() {
        let backend = Arc::new(MockBackend::new());
        let machine = machine_with(&backend, Duration::from_secs(60));
        machine.connect().await;

        // The window closes and a new connect lands before the backend
        // disconnect for the expired attempt gets to run.
        machine.expire_pairing(1);
        assert_eq!(machine.snapshot().phase(), Phase::Disconnected);
        assert_eq!(machine.connect().await.phase(), Phase::Pairing);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.disconnect_calls(), 0);
        assert!(backend.emit(BackendEvent::Connected));
        let state = machine.wait_for(WAIT, SessionState::is_connected).await;
        assert!(state.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribers_racing_transitions_start_from_a_published_state() {
        use {courier_protocol::StatusFrame, std::collections::HashMap};

        let backend = Arc::new(MockBackend::new());
        let machine = SessionMachine::new(Arc::clone(&backend) as Arc<dyn Backend>, SessionOptions {
            pairing_window: Duration::from_secs(60),
            outbox_capacity: 1024,
        });
        let mut reference = machine.subscribe();

        let racers: Vec<_> = (0..4)
            .map(|_| {
                let machine = Arc::clone(&machine);
                tokio::spawn(async move {
                    let mut firsts: Vec<StatusFrame> = Vec::new();
                    for _ in 0..200 {
                        let mut sub = machine.subscribe();
                        let first = sub.try_recv().unwrap();
                        assert!(first.snapshot);
                        let mut last = first.seq;
                        tokio::task::yield_now().await;
                        while let Some(frame) = sub.try_recv() {
                            assert!(!frame.snapshot);
                            assert_eq!(frame.seq, last + 1);
                            last = frame.seq;
                        }
                        firsts.push(first);
                    }
                    firsts
                })
            })
            .collect();

        for i in 0..30 {
            machine.connect().await;
            backend.emit(BackendEvent::PairingCodeReady(format!("code-{i}")));
            machine
                .wait_for(WAIT, |s| s.pairing_artifact().is_some())
                .await;
            backend.emit(BackendEvent::Connected);
            machine.wait_for(WAIT, SessionState::is_connected).await;
            machine.disconnect().await;
        }

        let mut published = HashMap::new();
        let mut expected_seq = 0;
        while let Some(frame) = reference.try_recv() {
            assert_eq!(frame.seq, expected_seq);
            expected_seq += 1;
            published.insert(frame.seq, frame.event);
        }
        assert_eq!(published.len(), 121);

        for racer in racers {
            for first in racer.await.unwrap() {
                let event = &first.event;
                assert_eq!(published.get(&first.seq), Some(event));
                if event.pairing_artifact.is_some() {
                    assert_eq!(event.phase, Phase::Pairing);
                }
                assert_eq!(event.error_detail.is_some(), event.phase == Phase::Errored);
            }
        }

        let mut late = machine.subscribe();
        let first = late.try_recv().unwrap();
        assert_eq!(first.seq, expected_seq - 1);
        assert_eq!(first.event, machine.snapshot().to_event());
    }
}
