//! Connectivity state and online/offline transitions.
//!
//! The monitor holds whatever the host platform last reported; it does not
//! probe or second-guess that signal itself. [`Probe`] is one such host
//! feed, for processes without a platform connectivity API.

mod probe;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub use probe::Probe;

/// Transitions a subscriber may fall behind by before it starts losing them.
const TRANSITION_BUFFER: usize = 64;

/// Current connectivity flag plus change notification.
#[derive(Clone)]
pub struct NetworkMonitor {
  state: std::sync::Arc<watch::Sender<bool>>,
  transitions: broadcast::Sender<bool>,
}

impl NetworkMonitor {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
    Self {
      state: std::sync::Arc::new(tx),
      transitions,
    }
  }

  /// Connectivity as last reported.
  pub fn is_online(&self) -> bool {
    *self.state.borrow()
  }

  /// Report connectivity from the platform.
  ///
  /// Returns `true` when this changed the state. Repeating the current value
  /// notifies nobody.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.state.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      // Published under the state lock so edges stay in state order.
      // No receivers is not an error.
      let _ = self.transitions.send(online);
      true
    });
    if changed {
      if online {
        tracing::info!("network: online");
      } else {
        tracing::warn!("network: offline");
      }
    }
    changed
  }

  /// Receiver that wakes on state changes. Only the latest value is kept,
  /// so quick flips coalesce; use [`transitions`](Self::transitions) to see
  /// every edge.
  pub fn changes(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }

  /// Receiver of every transition reported after this call, in order.
  pub fn transitions(&self) -> broadcast::Receiver<bool> {
    self.transitions.subscribe()
  }

  /// Call `on_online` / `on_offline` on each transition until the returned
  /// [`Subscription`] is dropped or unsubscribed.
  ///
  /// Callbacks run on a spawned task, so this must be called inside a tokio
  /// runtime. Each offline→online transition fires `on_online` exactly once.
  pub fn subscribe<F, G>(&self, on_online: F, on_offline: G) -> Subscription
  where
    F: Fn() + Send + 'static,
    G: Fn() + Send + 'static,
  {
    let mut rx = self.transitions.subscribe();
    let handle = tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(true) => on_online(),
          Ok(false) => on_offline(),
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            tracing::warn!(missed, "network subscriber fell behind, transitions skipped");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    Subscription { handle }
  }
}

/// Handle for a [`NetworkMonitor::subscribe`] registration.
pub struct Subscription {
  handle: JoinHandle<()>,
}

impl Subscription {
  /// Stop delivering transitions.
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
