// agent-queue: The job execution protocol of the action agent.
//
// Architecture:
//   Processor → MessagePoller::poll → MessageFactory → Job::execute
//   Job: claim → QueueProvider::delete_message → owner check → QueueMessage::process
//        → detached ResultReporter::report
//   Agent wires configuration, logging, the runbook RepositoryFetcher and the Processor,
//   and stops it on SIGINT/SIGTERM.

pub mod action;
pub mod agent;
pub mod error;
pub mod error_throttler;
pub mod job;
pub mod message;
pub mod process_invoker;
pub mod processor;
pub mod provider;
pub mod reporter;
pub mod repository;

pub use action::{ActionContext, ActionPayload, ActionQueueMessage};
pub use agent::{shutdown_signal, Agent};
pub use error::{ActionError, CloneError, JobError, QueueError, ReportError};
pub use job::{Job, JobState};
pub use message::{MessageAttribute, QueueMessage, RawMessage};
pub use processor::{MessageFactory, MessagePoller, Processor, ProcessorSettings};
pub use provider::{QueueMetadata, QueueProvider};
pub use reporter::{HttpResultReporter, ResultReporter};
pub use repository::{Cloner, GitCommandCloner, RepositoryFetcher};
