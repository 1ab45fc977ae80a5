// Job: the per-message execution protocol.
//
// claim (Initial → Executing) → delete from queue → owner check → process
//   → detached result report → Finished
// Any failure after the claim moves the job to Error and is returned to the caller.

use crate::error::JobError;
use crate::message::QueueMessage;
use crate::provider::QueueProvider;
use crate::reporter::ResultReporter;

use agent_common::constants::OWNER_ID_ATTRIBUTE;
use agent_common::{ActionResult, SecretMasker, TraceWriter, Tracing};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Initial = 0,
    Executing = 1,
    Finished = 2,
    Error = 3,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Initial,
            1 => JobState::Executing,
            2 => JobState::Finished,
            _ => JobState::Error,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Initial => write!(f, "Initial"),
            JobState::Executing => write!(f, "Executing"),
            JobState::Finished => write!(f, "Finished"),
            JobState::Error => write!(f, "Error"),
        }
    }
}

/// Coordinates deletion, authorization, execution and reporting for one queue message.
///
/// A job runs at most once. The first caller of [`execute`](Job::execute)
/// claims it with a compare-and-set on the state; every later or concurrent
/// caller gets [`JobError::AlreadyExecutingOrFinished`] without touching the
/// queue.
pub struct Job {
    id: String,
    queue_message: Box<dyn QueueMessage>,
    queue_provider: Arc<dyn QueueProvider>,
    reporter: Arc<dyn ResultReporter>,
    owner_id: String,
    api_key: String,
    base_url: String,
    state: AtomicU8,
    trace: Arc<dyn TraceWriter>,
}

impl Job {
    pub fn new(
        queue_message: Box<dyn QueueMessage>,
        queue_provider: Arc<dyn QueueProvider>,
        reporter: Arc<dyn ResultReporter>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let id = queue_message.message().message_id.clone();
        Self {
            id,
            queue_message,
            queue_provider,
            reporter,
            owner_id: owner_id.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            state: AtomicU8::new(JobState::Initial as u8),
            trace: Arc::new(Tracing::new("Job", SecretMasker::new())),
        }
    }

    /// Route this job's log lines (including the background report outcome) to `trace`.
    pub fn with_trace(mut self, trace: Arc<dyn TraceWriter>) -> Self {
        self.trace = trace;
        self
    }

    /// Identifier of the underlying queue message.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Region of the queue this job's message came from.
    pub fn region(&self) -> &str {
        self.queue_provider.metadata().region()
    }

    /// Run the job.
    ///
    /// The message is deleted before it is processed, so a failure past the
    /// deletion step leaves nothing on the queue to redeliver.
    pub async fn execute(&self) -> Result<(), JobError> {
        if self
            .state
            .compare_exchange(
                JobState::Initial as u8,
                JobState::Executing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(JobError::AlreadyExecutingOrFinished {
                job_id: self.id.clone(),
            });
        }

        let message = self.queue_message.message();
        let region = self.region();

        if let Err(cause) = self.queue_provider.delete_message(message).await {
            self.set_state(JobState::Error);
            return Err(JobError::DeletionFailed {
                message_id: self.id.clone(),
                region: region.to_string(),
                cause,
            });
        }

        self.trace.verbose(&format!(
            "Message[{}] is deleted from the queue[{}].",
            self.id, region
        ));

        if message.string_attribute(OWNER_ID_ATTRIBUTE) != Some(self.owner_id.as_str()) {
            self.set_state(JobState::Error);
            return Err(JobError::InvalidMessage {
                message_id: self.id.clone(),
            });
        }

        let result = match self.queue_message.process().await {
            Ok(result) => result,
            Err(cause) => {
                self.set_state(JobState::Error);
                return Err(JobError::ProcessingFailed {
                    message_id: self.id.clone(),
                    cause,
                });
            }
        };

        self.spawn_report(result);

        self.set_state(JobState::Finished);
        Ok(())
    }

    fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Deliver the result on a detached task. Its outcome is only logged.
    fn spawn_report(&self, result: ActionResult) {
        let reporter = self.reporter.clone();
        let trace = self.trace.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let message_id = self.id.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            match reporter.report(&result, &api_key, &base_url).await {
                Ok(()) => trace.verbose(&format!(
                    "Successfully sent result of message[{}] and it took {:.3} seconds.",
                    message_id,
                    start.elapsed().as_secs_f64()
                )),
                Err(e) => trace.warning(&format!(
                    "Could not send action result[{:?}] of message[{}]: {}",
                    result, message_id, e
                )),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ActionError, QueueError, ReportError};
    use crate::message::RawMessage;
    use crate::provider::QueueMetadata;
    use agent_common::{CollectingTraceWriter, TraceLevel};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct MockMessage {
        message: RawMessage,
        outcome: Result<ActionResult, String>,
        calls: CallLog,
    }

    #[async_trait]
    impl QueueMessage for MockMessage {
        fn message(&self) -> &RawMessage {
            &self.message
        }

        async fn process(&self) -> Result<ActionResult, ActionError> {
            self.calls.lock().push(format!("process:{}", self.message.message_id));
            self.outcome.clone().map_err(|reason| ActionError::Execution {
                file: "mock".into(),
                reason,
            })
        }
    }

    struct MockProvider {
        metadata: QueueMetadata,
        fail_delete: bool,
        calls: CallLog,
    }

    #[async_trait]
    impl QueueProvider for MockProvider {
        fn metadata(&self) -> &QueueMetadata {
            &self.metadata
        }

        async fn delete_message(&self, message: &RawMessage) -> Result<(), QueueError> {
            self.calls.lock().push(format!("delete:{}", message.message_id));
            if self.fail_delete {
                return Err(QueueError::Transport("connection reset".into()));
            }
            Ok(())
        }
    }

    /// Forwards every reported result to a channel.
    struct ChannelReporter {
        tx: mpsc::UnboundedSender<(ActionResult, String, String)>,
        fail: bool,
    }

    #[async_trait]
    impl ResultReporter for ChannelReporter {
        async fn report(
            &self,
            result: &ActionResult,
            api_key: &str,
            base_url: &str,
        ) -> Result<(), ReportError> {
            let _ = self
                .tx
                .send((result.clone(), api_key.to_string(), base_url.to_string()));
            if self.fail {
                return Err(ReportError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }

    /// Never completes until released.
    struct BlockedReporter {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ResultReporter for BlockedReporter {
        async fn report(&self, _: &ActionResult, _: &str, _: &str) -> Result<(), ReportError> {
            self.release.notified().await;
            Ok(())
        }
    }

    struct Fixture {
        calls: CallLog,
        reports: mpsc::UnboundedReceiver<(ActionResult, String, String)>,
        trace: Arc<CollectingTraceWriter>,
    }

    fn result_r() -> ActionResult {
        ActionResult {
            alert_id: "alert-1".into(),
            action: "Restart".into(),
            is_successful: true,
            ..Default::default()
        }
    }

    fn message(owner: Option<&str>) -> RawMessage {
        let message = RawMessage::new("msg-1", r#"{"action":"Restart"}"#);
        match owner {
            Some(owner) => message.with_attribute(OWNER_ID_ATTRIBUTE, owner),
            None => message,
        }
    }

    fn build_job(
        raw: RawMessage,
        outcome: Result<ActionResult, String>,
        fail_delete: bool,
        fail_report: bool,
    ) -> (Job, Fixture) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let (tx, reports) = mpsc::unbounded_channel();
        let trace = Arc::new(CollectingTraceWriter::new());

        let job = Job::new(
            Box::new(MockMessage {
                message: raw,
                outcome,
                calls: calls.clone(),
            }),
            Arc::new(MockProvider {
                metadata: QueueMetadata::new("us-west-2", "acct-1"),
                fail_delete,
                calls: calls.clone(),
            }),
            Arc::new(ChannelReporter {
                tx,
                fail: fail_report,
            }),
            "api-key-1",
            "https://api.example.com",
            "acct-1",
        )
        .with_trace(trace.clone());

        (
            job,
            Fixture {
                calls,
                reports,
                trace,
            },
        )
    }

    async fn next_report(
        rx: &mut mpsc::UnboundedReceiver<(ActionResult, String, String)>,
    ) -> (ActionResult, String, String) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reporter was not invoked")
            .expect("reporter channel closed")
    }

    #[tokio::test]
    async fn valid_message_is_deleted_processed_and_reported() {
        let (job, mut fx) = build_job(message(Some("acct-1")), Ok(result_r()), false, false);

        assert_eq!(job.id(), "msg-1");
        assert_eq!(job.state(), JobState::Initial);

        job.execute().await.unwrap();
        assert_eq!(job.state(), JobState::Finished);

        let (reported, api_key, base_url) = next_report(&mut fx.reports).await;
        assert_eq!(reported, result_r());
        assert_eq!(api_key, "api-key-1");
        assert_eq!(base_url, "https://api.example.com");

        // Exactly one report.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());

        assert_eq!(
            *fx.calls.lock(),
            vec!["delete:msg-1".to_string(), "process:msg-1".to_string()]
        );
    }

    #[tokio::test]
    async fn second_execute_has_no_side_effects() {
        let (job, mut fx) = build_job(message(Some("acct-1")), Ok(result_r()), false, false);

        job.execute().await.unwrap();
        next_report(&mut fx.reports).await;

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyExecutingOrFinished { ref job_id } if job_id == "msg-1"));
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(fx.calls.lock().len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_execute_after_failure_is_rejected() {
        let (job, fx) = build_job(message(Some("acct-1")), Ok(result_r()), true, false);

        assert!(matches!(
            job.execute().await,
            Err(JobError::DeletionFailed { .. })
        ));
        assert!(matches!(
            job.execute().await,
            Err(JobError::AlreadyExecutingOrFinished { .. })
        ));
        assert_eq!(job.state(), JobState::Error);
        assert_eq!(*fx.calls.lock(), vec!["delete:msg-1".to_string()]);
    }

    #[tokio::test]
    async fn foreign_owner_is_rejected_after_deletion() {
        let (job, mut fx) = build_job(message(Some("acct-2")), Ok(result_r()), false, false);

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, JobError::InvalidMessage { ref message_id } if message_id == "msg-1"));
        assert!(err.message_consumed());
        assert_eq!(job.state(), JobState::Error);
        assert_eq!(*fx.calls.lock(), vec!["delete:msg-1".to_string()]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_owner_attribute_is_rejected() {
        let (job, fx) = build_job(message(None), Ok(result_r()), false, false);

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, JobError::InvalidMessage { .. }));
        assert_eq!(*fx.calls.lock(), vec!["delete:msg-1".to_string()]);
    }

    #[tokio::test]
    async fn deletion_failure_stops_before_processing() {
        let (job, mut fx) = build_job(message(Some("acct-1")), Ok(result_r()), true, false);

        let err = job.execute().await.unwrap_err();
        match &err {
            JobError::DeletionFailed {
                message_id,
                region,
                cause,
            } => {
                assert_eq!(message_id, "msg-1");
                assert_eq!(region, "us-west-2");
                assert!(matches!(cause, QueueError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.message_consumed());
        assert!(err.to_string().contains("queue[us-west-2]"));
        assert_eq!(*fx.calls.lock(), vec!["delete:msg-1".to_string()]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn processing_failure_is_terminal_and_unreported() {
        let (job, mut fx) = build_job(
            message(Some("acct-1")),
            Err("exit code 127".into()),
            false,
            false,
        );

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, JobError::ProcessingFailed { ref message_id, .. } if message_id == "msg-1"));
        assert!(err.to_string().contains("exit code 127"));
        assert_eq!(job.state(), JobState::Error);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn reporting_failure_is_only_logged() {
        let (job, mut fx) = build_job(message(Some("acct-1")), Ok(result_r()), false, true);

        job.execute().await.unwrap();
        assert_eq!(job.state(), JobState::Finished);
        next_report(&mut fx.reports).await;

        let mut warnings = Vec::new();
        for _ in 0..100 {
            warnings = fx.trace.at_level(TraceLevel::Warning);
            if !warnings.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("message[msg-1]"));
        assert!(warnings[0].contains("503"));
        assert_eq!(job.state(), JobState::Finished);
    }

    #[tokio::test]
    async fn slow_reporter_does_not_block_completion() {
        let release = Arc::new(Notify::new());
        let job = Job::new(
            Box::new(MockMessage {
                message: message(Some("acct-1")),
                outcome: Ok(result_r()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }),
            Arc::new(MockProvider {
                metadata: QueueMetadata::new("eu-central-1", "acct-1"),
                fail_delete: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }),
            Arc::new(BlockedReporter {
                release: release.clone(),
            }),
            "api-key-1",
            "https://api.example.com",
            "acct-1",
        );

        tokio::time::timeout(Duration::from_secs(5), job.execute())
            .await
            .expect("execute blocked on the reporter")
            .unwrap();
        assert_eq!(job.state(), JobState::Finished);
        release.notify_one();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_execute_runs_once() {
        const CALLERS: usize = 16;
        let (job, mut fx) = build_job(message(Some("acct-1")), Ok(result_r()), false, false);
        let job = Arc::new(job);

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let job = job.clone();
                tokio::spawn(async move { job.execute().await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let ok = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(JobError::AlreadyExecutingOrFinished { .. }))))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(rejected, CALLERS - 1);
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(fx.calls.lock().len(), 2);

        next_report(&mut fx.reports).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.reports.try_recv().is_err());
    }
}
