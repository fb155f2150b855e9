use tokio::sync::watch::{self, Receiver, Sender};

/// A one-shot completion signal.
///
/// Clones share the same underlying state: firing any clone fires all of them.
/// Firing is idempotent, only the first call has an effect, and waiters that
/// arrive late resolve immediately.
#[derive(Clone, Debug)]
pub struct Completion {
    tx: Sender<bool>,
    rx: Receiver<bool>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Fires the signal. Returns `true` only for the call that actually
    /// fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // We hold a sender ourselves, so the channel can never close under us.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
