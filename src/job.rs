//! # External Generation Job
//!
//! The tide predictions are produced outside this crate. A run hands the
//! generator a [`JobRequest`] carrying a fresh correlation token and the
//! location where raw readings should be written; the generator later reports
//! back with a [`JobCallback`] for that token.
//!
//! Dispatch is fire-and-forget: once submitted a job cannot be cancelled, and
//! its callback may arrive after the run has stopped waiting (it is then
//! dropped by the [`CallbackRegistry`]).

use crate::callbacks::CallbackRegistry;
use crate::storage::{ObjectLocation, ObjectStore, PutOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Opaque correlation id between a run and its job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobToken(Uuid);

impl JobToken {
    pub fn new() -> Self {
        JobToken(Uuid::new_v4())
    }
}

impl Default for JobToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Job description sent to the generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub token: JobToken,
    /// Where the generator should write raw readings
    pub output: ObjectLocation,
}

/// Outcome reported by the generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { reason: String },
}

/// Completion callback for one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCallback {
    pub token: JobToken,
    pub status: JobStatus,
    /// Where the readings actually landed
    pub output_location: ObjectLocation,
}

/// The job could not be submitted at all.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to start generator `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Submits generation jobs.
///
/// `dispatch` returns once the job is accepted. Completion is reported later
/// through `callbacks`.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: JobRequest,
        callbacks: CallbackRegistry,
    ) -> Result<(), DispatchError>;
}

/// Runs a local prediction command as the generation job.
///
/// The command's stdout is stored at the requested output location. The
/// token and output location are exported as `TIDDLER_JOB_TOKEN` and
/// `TIDDLER_OUTPUT`. A non-zero exit, output that is not UTF-8, or a storage
/// failure is reported as a failed job.
pub struct CommandDispatcher {
    program: String,
    args: Vec<String>,
    store: Arc<dyn ObjectStore>,
}

impl CommandDispatcher {
    pub fn new(program: impl Into<String>, args: Vec<String>, store: Arc<dyn ObjectStore>) -> Self {
        CommandDispatcher {
            program: program.into(),
            args,
            store,
        }
    }

    /// Build from `[program, args...]`. Returns `None` for an empty command.
    pub fn from_command_line(command: &[String], store: Arc<dyn ObjectStore>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), store))
    }
}

#[async_trait]
impl JobDispatcher for CommandDispatcher {
    async fn dispatch(
        &self,
        request: JobRequest,
        callbacks: CallbackRegistry,
    ) -> Result<(), DispatchError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("TIDDLER_JOB_TOKEN", request.token.to_string())
            .env("TIDDLER_OUTPUT", request.output.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tracing::info!(token = %request.token, program = %self.program, "generation job started");

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let status = match child.wait_with_output().await {
                Ok(output) if output.status.success() => match String::from_utf8(output.stdout) {
                    Ok(body) => match store
                        .put(&request.output, body, &PutOptions::private("text/csv"))
                        .await
                    {
                        Ok(()) => JobStatus::Succeeded,
                        Err(e) => JobStatus::Failed {
                            reason: format!("storing readings: {e}"),
                        },
                    },
                    Err(e) => JobStatus::Failed {
                        reason: format!("generator output is not valid UTF-8: {e}"),
                    },
                },
                Ok(output) => JobStatus::Failed {
                    reason: format!(
                        "generator exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                },
                Err(e) => JobStatus::Failed {
                    reason: format!("waiting for generator: {e}"),
                },
            };

            let token = request.token.clone();
            let accepted = callbacks.deliver(JobCallback {
                token: request.token,
                status,
                output_location: request.output,
            });
            if !accepted {
                tracing::warn!(%token, "generation job finished after its run stopped waiting");
            }
        });

        Ok(())
    }
}
