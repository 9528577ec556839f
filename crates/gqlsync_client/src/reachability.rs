//! Network reachability signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Tells the operation queue whether the network is usable.
///
/// Platform code (or a test) owns the monitor and flips it with
/// [`ReachabilityMonitor::set_reachable`]; the client subscribes to changes.
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct ReachabilityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ReachabilityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(reachable: bool) -> Self {
        let (state, _) = watch::channel(reachable);
        Self {
            state: Arc::new(state),
        }
    }

    /// Creates a monitor that starts reachable.
    pub fn reachable() -> Self {
        Self::new(true)
    }

    /// Creates a monitor that starts unreachable.
    pub fn unreachable() -> Self {
        Self::new(false)
    }

    /// Returns true if the network is currently reachable.
    pub fn is_reachable(&self) -> bool {
        *self.state.borrow()
    }

    /// Updates the reachability state, waking subscribers if it changed.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
        if changed {
            info!(reachable, "network reachability changed");
        }
    }

    /// Subscribes to reachability changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Waits until the network is reachable or `timeout` elapses.
    ///
    /// Returns true if the network became (or already was) reachable.
    pub async fn wait_reachable(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.subscribe();
        let wait = rx.wait_for(|reachable| *reachable);
        match timeout {
            Some(timeout) => matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_))),
            None => wait.await.is_ok(),
        }
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::reachable()
    }
}
