//! Gateway: owns the WhatsApp session and exposes it over HTTP and WebSocket.
//!
//! Lifecycle:
//! 1. Load config and pick a backend (Cloud API or simulation)
//! 2. Build the session state machine and its status hub
//! 3. Start the HTTP server (health, status, connect, disconnect, send)
//! 4. Attach the `/ws` status stream
//! 5. Optionally request a connect at startup
//!
//! Session transitions live in `session.rs`; everything else only reads
//! snapshots or asks the machine to act.

pub mod broadcast;
pub mod pairing;
pub mod send;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

pub use {
    broadcast::{StatusHub, SubscriberId, Subscription},
    send::{RejectReason, SendCoordinator, SendRequest, SendResult},
    server::{build_gateway_app, start_gateway},
    session::{SessionMachine, SessionOptions, SessionState, SessionStatus},
    state::{BackendInfo, GatewayOptions, GatewayState},
};
