use std::sync::Arc;
use tokio::sync::watch;

/// Stops a device. Clones share the same signal, so the device loop and any
/// request waiting on that device all observe the same stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Signals every clone of this shutdown. Calling it again has no effect.
    pub fn shut_down(&self) {
        self.notify.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.notify.borrow()
    }

    /// Resolves once [`shut_down`](Self::shut_down) has been called on any
    /// clone, immediately if it already has been.
    pub async fn wait_for_shutdown(&self) {
        let mut recv = self.notify.subscribe();
        while !*recv.borrow_and_update() {
            // The sender lives as long as `self`, so this never errors
            if recv.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
