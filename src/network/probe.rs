//! Reachability probe feeding a [`NetworkMonitor`].

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::transport::{ApiRequest, Transport};

use super::NetworkMonitor;

/// Periodically requests a health path and reports the result as the
/// connectivity flag. Any HTTP response counts as online, even an error
/// status: the API was reachable.
pub struct Probe<T: Transport> {
  transport: T,
  monitor: NetworkMonitor,
  path: String,
  interval: Duration,
}

impl<T: Transport> Probe<T> {
  pub fn new(transport: T, monitor: NetworkMonitor, path: &str, interval: Duration) -> Self {
    Self {
      transport,
      monitor,
      path: path.to_string(),
      interval,
    }
  }

  /// Probe once and update the monitor. Returns the observed state.
  pub async fn check(&self) -> bool {
    let online = match self.transport.send(ApiRequest::get(self.path.as_str())).await {
      Ok(response) => {
        tracing::trace!(status = response.status, "probe reached api");
        true
      }
      Err(e) => {
        tracing::debug!(error = %e, "probe failed");
        false
      }
    };
    self.monitor.set_online(online);
    online
  }

  /// Probe on every tick until the task is aborted. The first probe runs
  /// immediately.
  pub fn spawn(self) -> JoinHandle<()>
  where
    T: 'static,
  {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        self.check().await;
      }
    })
  }
}
