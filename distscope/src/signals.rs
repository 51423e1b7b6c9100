//! Stop coordination between the reader task and the capture server.
//!
//! The first [`Reason`] recorded wins. Later calls to [`Shutdown::signal`]
//! are ignored, so the log shows why distscope actually stopped.

use std::{future, sync::Arc};

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why distscope is stopping.
pub enum Reason {
    /// The operator interrupted distscope.
    Interrupt,
    /// The capture server stopped on its own. The reader task must release
    /// the input source.
    ServerStopped,
}

#[derive(Debug, Clone)]
/// Shared stop flag. Every clone observes the same [`Reason`].
pub struct Shutdown {
    sender: Arc<watch::Sender<Option<Reason>>>,
    reason: watch::Receiver<Option<Reason>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a new, unsignaled `Shutdown`.
    #[must_use]
    pub fn new() -> Self {
        let (sender, reason) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
            reason,
        }
    }

    /// Record `reason` unless a reason is already set. Returns whether this
    /// call was the one that stopped distscope.
    #[must_use]
    pub fn signal(&self, reason: Reason) -> bool {
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// The recorded reason, if any, without waiting.
    #[must_use]
    pub fn reason(&self) -> Option<Reason> {
        *self.reason.borrow()
    }

    /// Wait until a reason is recorded and return it. Returns immediately if
    /// one already was.
    pub async fn recv(&mut self) -> Reason {
        let reason = self
            .reason
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|reason| *reason);
        match reason {
            Some(reason) => reason,
            // Every instance holds the sender, the channel never closes.
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn clones_observe_the_first_reason() {
        let root = Shutdown::new();
        let mut a = root.clone();
        let mut b = root.clone();
        assert_eq!(root.reason(), None);

        assert!(b.signal(Reason::Interrupt));
        assert!(!root.signal(Reason::ServerStopped));

        let got = tokio::time::timeout(Duration::from_secs(1), a.recv())
            .await
            .expect("a observes shutdown");
        assert_eq!(got, Reason::Interrupt);
        let got = tokio::time::timeout(Duration::from_secs(1), b.recv())
            .await
            .expect("b observes shutdown");
        assert_eq!(got, Reason::Interrupt);
        assert_eq!(root.reason(), Some(Reason::Interrupt));
    }

    #[tokio::test]
    async fn clone_made_after_signal_sees_reason() {
        let root = Shutdown::new();
        assert!(root.signal(Reason::ServerStopped));
        let mut late = root.clone();
        let got = tokio::time::timeout(Duration::from_millis(10), late.recv())
            .await
            .expect("late clone returns immediately");
        assert_eq!(got, Reason::ServerStopped);
    }

    #[tokio::test]
    async fn recv_waits_until_signaled() {
        let mut waiter = Shutdown::new();
        let signaler = waiter.clone();
        assert!(
            tokio::time::timeout(Duration::from_millis(10), waiter.recv())
                .await
                .is_err()
        );
        assert!(signaler.signal(Reason::Interrupt));
        assert_eq!(waiter.recv().await, Reason::Interrupt);
    }
}
