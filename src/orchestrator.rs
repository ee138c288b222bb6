//! # Job Orchestrator
//!
//! Drives one feed refresh from trigger to published artifact. Each call to
//! [`Orchestrator::run`] creates a fresh [`WorkflowRun`] and walks it through
//! a fixed sequence of states:
//!
//! ```text
//! Submitted ──dispatch──► AwaitingCallback ──success──► Transforming ──► Publishing ──► Succeeded
//!     │                        │    │                        │               │
//!     └──────────► Failed ◄────┘    └─► TimedOut             └──► Failed ◄───┘
//! ```
//!
//! ## Timeouts
//!
//! - **Step timeout**: bounded wait for the job's callback. Expiry -> `TimedOut`.
//! - **Run deadline**: budget for the whole run. If it expires while waiting
//!   for the callback the run is `TimedOut`; if it expires during dispatch,
//!   transform or publish the run is `Failed`.
//!
//! ## Failure Policy
//!
//! Any error ends the run immediately in a terminal state; nothing is retried
//! within a run and the next scheduled trigger starts over. Publishing is the
//! last step, so a failed run never replaces the previously published feed.
//!
//! Runs are independent. Two overlapping runs both publish to the same key and
//! the one finishing last wins.

use crate::calendar::{FeedConfig, CONTENT_TYPE};
use crate::callbacks::CallbackRegistry;
use crate::job::{DispatchError, JobCallback, JobDispatcher, JobRequest, JobStatus, JobToken};
use crate::pipeline;
use crate::readings::ParseError;
use crate::storage::{ObjectLocation, ObjectStore, PutOptions, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// Lifecycle state of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunState {
    Submitted,
    AwaitingCallback,
    Transforming,
    Publishing,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::TimedOut)
    }

    /// Whether `self -> next` is an edge of the workflow.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Submitted, AwaitingCallback) | (Submitted, Failed) => true,
            (AwaitingCallback, Transforming | Failed | TimedOut) => true,
            (Transforming, Publishing | Failed) => true,
            (Publishing, Succeeded | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Attempted a transition that is not an edge of the workflow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Why a run did not succeed.
#[derive(Error, Debug)]
pub enum RunError {
    /// The generation job could not be submitted
    #[error("job dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// The generation job reported failure
    #[error("generation job failed: {0}")]
    JobFailure(String),

    /// No callback arrived in time
    #[error("no job callback after {waited:?}")]
    Timeout { waited: Duration },

    /// The run deadline passed outside the callback wait
    #[error("run deadline exceeded while {stage}")]
    DeadlineExceeded { stage: RunState },

    /// Job output could not be read
    #[error("reading job output: {0}")]
    Source(#[source] StorageError),

    /// Job output was malformed
    #[error("parsing job output: {0}")]
    Parse(#[from] ParseError),

    /// The feed could not be written
    #[error("publishing feed: {0}")]
    Publish(#[source] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl RunError {
    /// Terminal state this error leaves the run in.
    pub fn terminal_state(&self) -> RunState {
        match self {
            RunError::Timeout { .. } => RunState::TimedOut,
            _ => RunState::Failed,
        }
    }
}

/// Per-run settings, built from the application config.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Where the job writes raw readings
    pub source: ObjectLocation,
    /// Where the feed is published
    pub dest: ObjectLocation,
    pub step_timeout: Duration,
    pub run_deadline: Duration,
    pub feed: FeedConfig,
}

/// One execution of the workflow.
///
/// Lives only for the duration of [`Orchestrator::run`].
#[derive(Debug)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub job_token: JobToken,
    pub source: ObjectLocation,
    pub dest: ObjectLocation,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
    state: RunState,
}

impl WorkflowRun {
    pub fn new(config: &RunConfig) -> Self {
        WorkflowRun {
            run_id: Uuid::new_v4(),
            job_token: JobToken::new(),
            source: config.source.clone(),
            dest: config.dest.clone(),
            started_at: Utc::now(),
            deadline: Instant::now() + config.run_deadline,
            state: RunState::Submitted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`, rejecting anything that is not a workflow edge.
    pub fn advance(&mut self, next: RunState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::info!(
            run_id = %self.run_id,
            from = %self.state,
            to = %next,
            "run state changed"
        );
        self.state = next;
        Ok(())
    }
}

/// Terminal status of a run, kept for the caller after the run is discarded.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job_token: JobToken,
    pub state: RunState,
    /// Human-readable failure cause; `None` on success
    pub cause: Option<RunError>,
    /// Number of events published
    pub events: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }
}

/// Coordinates the generation job with transform and publish.
pub struct Orchestrator {
    config: RunConfig,
    dispatcher: Arc<dyn JobDispatcher>,
    store: Arc<dyn ObjectStore>,
    callbacks: CallbackRegistry,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        dispatcher: Arc<dyn JobDispatcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Orchestrator {
            config,
            dispatcher,
            store,
            callbacks: CallbackRegistry::new(),
        }
    }

    /// Registry through which job callbacks reach waiting runs.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Execute one run to a terminal state.
    pub async fn run(&self) -> RunReport {
        let mut run = WorkflowRun::new(&self.config);
        tracing::info!(
            run_id = %run.run_id,
            token = %run.job_token,
            source = %run.source,
            dest = %run.dest,
            "workflow run started"
        );

        let (cause, events) = match self.drive(&mut run).await {
            Ok(events) => (None, events),
            Err(error) => {
                let terminal = error.terminal_state();
                if !run.state().is_terminal() {
                    // Only fails for a terminal run, which drive() never leaves behind.
                    let _ = run.advance(terminal);
                }
                tracing::error!(run_id = %run.run_id, state = %run.state(), "run failed: {error}");
                (Some(error), 0)
            }
        };

        RunReport {
            run_id: run.run_id,
            job_token: run.job_token.clone(),
            state: run.state(),
            cause,
            events,
            started_at: run.started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(&self, run: &mut WorkflowRun) -> Result<usize, RunError> {
        // Register first so a fast job cannot call back before anyone listens.
        let receiver = self.callbacks.register(run.job_token.clone());
        let request = JobRequest {
            token: run.job_token.clone(),
            output: run.source.clone(),
        };

        let dispatched = timeout_at(
            run.deadline,
            self.dispatcher.dispatch(request, self.callbacks.clone()),
        )
        .await;
        match dispatched {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.callbacks.revoke(&run.job_token);
                return Err(e.into());
            }
            Err(_) => {
                self.callbacks.revoke(&run.job_token);
                return Err(RunError::DeadlineExceeded {
                    stage: RunState::Submitted,
                });
            }
        }
        run.advance(RunState::AwaitingCallback)?;

        let callback = self.await_callback(run, receiver).await?;
        if let JobStatus::Failed { reason } = callback.status {
            return Err(RunError::JobFailure(reason));
        }
        run.advance(RunState::Transforming)?;

        let transformed = timeout_at(run.deadline, self.transform(&callback))
            .await
            .map_err(|_| RunError::DeadlineExceeded {
                stage: RunState::Transforming,
            })??;
        run.advance(RunState::Publishing)?;

        let events = transformed.events.len();
        timeout_at(
            run.deadline,
            self.store.put(
                &run.dest,
                transformed.ics,
                &PutOptions::public(CONTENT_TYPE),
            ),
        )
        .await
        .map_err(|_| RunError::DeadlineExceeded {
            stage: RunState::Publishing,
        })?
        .map_err(RunError::Publish)?;

        tracing::info!(run_id = %run.run_id, events, dest = %run.dest, "feed published");
        run.advance(RunState::Succeeded)?;
        Ok(events)
    }

    /// Wait for the job callback or the earlier of step timeout and deadline.
    async fn await_callback(
        &self,
        run: &WorkflowRun,
        mut receiver: oneshot::Receiver<JobCallback>,
    ) -> Result<JobCallback, RunError> {
        let waiting_since = Instant::now();
        let wait_until = (waiting_since + self.config.step_timeout).min(run.deadline);

        tokio::select! {
            received = &mut receiver => {
                received.map_err(|_| RunError::JobFailure("callback channel closed".to_string()))
            }
            _ = tokio::time::sleep_until(wait_until) => {
                if self.callbacks.revoke(&run.job_token) {
                    return Err(RunError::Timeout { waited: wait_until - waiting_since });
                }
                // The callback took the token just before the timer fired.
                receiver
                    .try_recv()
                    .map_err(|_| RunError::Timeout { waited: wait_until - waiting_since })
            }
        }
    }

    async fn transform(&self, callback: &JobCallback) -> Result<pipeline::Transformed, RunError> {
        let raw = self
            .store
            .get(&callback.output_location)
            .await
            .map_err(RunError::Source)?;
        Ok(pipeline::transform(&raw, &self.config.feed)?)
    }
}
