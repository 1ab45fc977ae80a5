//! Error types for the job execution protocol and its collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure of a [`Job`](crate::job::Job).
///
/// Every variant except `AlreadyExecutingOrFinished` is raised after the
/// message was claimed; from `InvalidMessage` on, the message is already gone
/// from the queue.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job[{job_id}] is already executing or finished")]
    AlreadyExecutingOrFinished { job_id: String },

    #[error("Message[{message_id}] could not be deleted from the queue[{region}]: {cause}")]
    DeletionFailed {
        message_id: String,
        region: String,
        #[source]
        cause: QueueError,
    },

    #[error("Message[{message_id}] is invalid, will not be processed")]
    InvalidMessage { message_id: String },

    #[error("Message[{message_id}] could not be processed: {cause}")]
    ProcessingFailed {
        message_id: String,
        #[source]
        cause: ActionError,
    },
}

impl JobError {
    /// Whether the message was removed from the queue before the failure.
    pub fn message_consumed(&self) -> bool {
        matches!(
            self,
            JobError::InvalidMessage { .. } | JobError::ProcessingFailed { .. }
        )
    }
}

/// Failure talking to the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message {0} was not found in the queue")]
    NotFound(String),

    #[error("queue transport error: {0}")]
    Transport(String),
}

/// Failure running an action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("malformed action payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("no action mapping configured for action '{0}'")]
    NoMapping(String),

    #[error("failed to run '{file}': {reason}")]
    Execution { file: String, reason: String },
}

/// Failure delivering an action result to the control plane. Only ever logged.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Failure fetching the runbook repository.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("failed to create repository directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("private key file '{}' does not exist", .0.display())]
    PrivateKey(PathBuf),

    #[error("failed to launch git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git clone of '{url}' exited with code {code}: {stderr}")]
    Git {
        url: String,
        code: i32,
        stderr: String,
    },
}
