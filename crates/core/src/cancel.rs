//! Cooperative cancellation, checked at stage boundaries.

use std::sync::Arc;

use tokio::sync::watch;

/// Held by whoever may stop the job.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Held by the job; never interrupts a collaborator call in flight.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Lets a cancelled job run again; committed state is untouched either way.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_to_every_token() {
        let (handle, token) = cancel_pair();
        let other = token.clone();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());

        handle.reset();
        assert!(!other.is_cancelled());
    }
}
