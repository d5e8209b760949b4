//! Backend adapter contract.
//!
//! A backend performs the real network work against the messaging service:
//! connecting a session, tearing it down, and sending text. Lifecycle changes
//! come back as a stream of [`BackendEvent`]s. The gateway core only sees the
//! [`Backend`] trait, so a live client and the [`mock::MockBackend`] double are
//! interchangeable.

pub mod backend;
pub mod mock;

pub use backend::{Backend, BackendError, BackendEvent, BackendEventStream, ProviderMessageId};
