//! # Job Callback Registry
//!
//! Correlates completion callbacks from the external generation job with the
//! workflow run waiting for them. Each run registers its token before
//! dispatching and receives a one-shot channel; the job's callback is routed
//! through [`CallbackRegistry::deliver`].
//!
//! Removing a token from the map is the single point of truth for "who owns
//! this run's completion": whichever of `deliver` or `revoke` takes the entry
//! under the lock wins. A run that timed out has already revoked its token, so
//! a late callback finds nothing and is dropped.

use crate::job::{JobCallback, JobToken};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

type Pending = HashMap<JobToken, oneshot::Sender<JobCallback>>;

/// Shared token -> waiting-run map. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct CallbackRegistry {
    pending: Arc<Mutex<Pending>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // Entries stay consistent even if a holder panicked mid-insert.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start waiting for `token`. Registering a token twice replaces the
    /// earlier waiter, whose receiver then reports a closed channel.
    pub fn register(&self, token: JobToken) -> oneshot::Receiver<JobCallback> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(token, tx);
        rx
    }

    /// Route a callback to its run.
    ///
    /// Returns `false` when the token is unknown, was already completed, or
    /// belongs to a run that gave up waiting. Such callbacks have no effect.
    pub fn deliver(&self, callback: JobCallback) -> bool {
        let sender = self.lock().remove(&callback.token);
        match sender {
            Some(sender) => {
                let token = callback.token.clone();
                if sender.send(callback).is_err() {
                    tracing::debug!(%token, "callback receiver already dropped");
                    return false;
                }
                true
            }
            None => {
                tracing::debug!(
                    token = %callback.token,
                    "ignoring callback for unknown or finished token"
                );
                false
            }
        }
    }

    /// Stop waiting for `token`.
    ///
    /// Returns `true` if the entry was still present, meaning no callback can
    /// reach the run any more. `false` means a callback already took it.
    pub fn revoke(&self, token: &JobToken) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Number of runs currently waiting for a callback.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}
