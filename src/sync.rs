//! Replays the mutation queue against the live API.
//!
//! Conflict policy is last-write-wins with the server as the authority: a
//! replay either is accepted or is not, nothing is merged locally. Actions go
//! out one at a time in queue order, so two writes to the same resource reach
//! the server in the order they were made.

use serde::Serialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::{MutationQueue, PendingAction};
use crate::storage::StorageAdapter;
use crate::transport::Transport;

/// Attempts allowed per action before it is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Actions the server accepted (removed from the queue)
  pub synced: usize,
  /// Actions that failed this pass, dropped ones included
  pub failed: usize,
  /// Actions discarded for reaching the retry ceiling
  pub dropped: usize,
}

/// Sequential queue replayer.
#[derive(Debug, Clone)]
pub struct SyncEngine {
  max_retries: u32,
  /// Per-action limit; `None` leaves timing to the transport
  action_timeout: Option<Duration>,
}

impl Default for SyncEngine {
  fn default() -> Self {
    Self {
      max_retries: DEFAULT_MAX_RETRIES,
      action_timeout: None,
    }
  }
}

impl SyncEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_action_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.action_timeout = timeout;
    self
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  /// Run one pass over a snapshot of the queue.
  ///
  /// Actions enqueued while the pass runs are left for the next pass.
  /// Replay failures are recorded on the action and counted, never returned
  /// as errors; only storage failures abort the pass.
  pub async fn process_queue<S, T>(
    &self,
    queue: &MutationQueue<S>,
    transport: &T,
  ) -> Result<SyncReport>
  where
    S: StorageAdapter,
    T: Transport,
  {
    let mut report = SyncReport::default();
    let actions = queue.snapshot().await?;

    for action in actions {
      if action.retry_count >= self.max_retries {
        tracing::warn!(
          id = %action.id,
          method = %action.method,
          path = %action.path,
          retries = action.retry_count,
          "dropping action after reaching retry limit"
        );
        queue.dequeue_by_id(&action.id).await?;
        report.failed += 1;
        report.dropped += 1;
        continue;
      }

      match self.replay(&action, transport).await {
        Ok(()) => {
          queue.dequeue_by_id(&action.id).await?;
          report.synced += 1;
        }
        Err(e) => {
          tracing::debug!(id = %action.id, error = %e, "replay failed");
          queue.increment_retry(&action.id).await?;
          report.failed += 1;
        }
      }
    }

    if report.synced > 0 {
      queue.record_sync().await?;
    }

    tracing::info!(
      synced = report.synced,
      failed = report.failed,
      dropped = report.dropped,
      "sync pass complete"
    );
    Ok(report)
  }

  /// Send one action; any non-2xx status is a failure.
  async fn replay<T: Transport>(&self, action: &PendingAction, transport: &T) -> Result<()> {
    let request = action.to_request();
    let response = match self.action_timeout {
      Some(limit) => tokio::time::timeout(limit, transport.send(request))
        .await
        .map_err(|_| Error::Transport(format!("timed out after {:?}", limit)))??,
      None => transport.send(request).await?,
    };

    if response.is_success() {
      Ok(())
    } else {
      Err(Error::Http {
        method: action.method.into(),
        path: action.path.clone(),
        status: response.status,
        body: response.body,
      })
    }
  }
}
