//! Pairing window timer.

use std::time::Duration;

use tokio::task::AbortHandle;

/// One-shot timer bounding how long a pairing attempt may stay unlinked.
///
/// Cancelled explicitly or on drop. Cancellation only stops a callback that
/// has not started yet, so the callback must still check that its attempt is
/// current before acting.
#[derive(Debug)]
pub struct PairingTimer {
    handle: AbortHandle,
}

impl PairingTimer {
    /// Run `on_expire` after `window` unless cancelled first.
    pub fn arm<F>(window: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            on_expire();
        })
        .abort_handle();
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PairingTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
