//! Server reachability signal.

use tokio::sync::watch;

/// Whether the server can currently be reached. The platform layer feeds
/// it, sessions subscribe to it.
#[derive(Debug)]
pub struct Reachability {
    tx: watch::Sender<bool>,
}

impl Reachability {
    /// Creates a signal with an initial value.
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx }
    }

    /// Publishes a new value. Repeating the current value wakes nobody.
    pub fn set(&self, reachable: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != reachable;
            *current = reachable;
            changed
        });
    }

    /// Current value.
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Follows the signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let reachability = Reachability::new(false);
        let mut rx = reachability.subscribe();
        assert!(!*rx.borrow_and_update());

        reachability.set(false);
        assert!(!rx.has_changed().unwrap());

        reachability.set(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(reachability.is_reachable());
    }
}
