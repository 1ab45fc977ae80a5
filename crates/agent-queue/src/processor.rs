// Processor: polls a queue, turns messages into jobs and runs them concurrently.

use crate::error::{JobError, QueueError};
use crate::error_throttler::ErrorThrottler;
use crate::job::Job;
use crate::message::{QueueMessage, RawMessage};
use crate::provider::QueueProvider;
use crate::reporter::ResultReporter;

use agent_common::{AgentSettings, TraceWriter};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Source of raw messages for one queue endpoint.
#[async_trait]
pub trait MessagePoller: Send + Sync {
    /// The provider jobs built from polled messages delete through.
    fn provider(&self) -> Arc<dyn QueueProvider>;

    /// Receive up to `max_messages`. An empty batch means the queue is idle.
    async fn poll(&self, max_messages: usize) -> Result<Vec<RawMessage>, QueueError>;
}

/// Wraps a polled message into something a [`Job`] can process.
pub type MessageFactory = Arc<dyn Fn(RawMessage) -> Box<dyn QueueMessage> + Send + Sync>;

/// Knobs and credentials the processor hands to every job.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub shutdown_grace_period: Duration,
    pub api_key: String,
    pub base_url: String,
    pub owner_id: String,
}

impl From<&AgentSettings> for ProcessorSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            concurrency: settings.poller_concurrency.max(1),
            poll_interval: settings.poll_interval(),
            shutdown_grace_period: settings.shutdown_grace_period(),
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            owner_id: settings.owner_id.clone(),
        }
    }
}

/// Owns the polling loop and the pool of in-flight jobs.
///
/// At most `concurrency` jobs run at once; the loop only asks the queue for as
/// many messages as there are free slots, so nothing sits received but
/// unclaimed in memory.
pub struct Processor {
    settings: Arc<ProcessorSettings>,
    poller: Arc<dyn MessagePoller>,
    reporter: Arc<dyn ResultReporter>,
    factory: MessageFactory,
    trace: Arc<dyn TraceWriter>,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(
        settings: ProcessorSettings,
        poller: Arc<dyn MessagePoller>,
        reporter: Arc<dyn ResultReporter>,
        factory: MessageFactory,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            poller,
            reporter,
            factory,
            trace,
            shutdown: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.lock().is_some()
    }

    /// Spawn the polling loop. A processor can be started once.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.loop_handle.lock();
        if handle.is_some() {
            bail!("Processor is already running");
        }
        if self.shutdown.is_cancelled() {
            bail!("Processor was stopped and cannot be restarted");
        }

        let provider = self.poller.provider();
        let metadata = provider.metadata();
        self.trace.info(&format!(
            "Processor is starting with {} worker(s) on queue[{}]",
            self.settings.concurrency,
            metadata.region()
        ));
        if !metadata.owner_id().is_empty() && metadata.owner_id() != self.settings.owner_id {
            self.trace.warning(&format!(
                "Queue[{}] serves owner[{}] but the agent is configured for owner[{}]; its messages will be rejected",
                metadata.region(),
                metadata.owner_id(),
                self.settings.owner_id
            ));
        }

        let run = PollLoop {
            settings: self.settings.clone(),
            poller: self.poller.clone(),
            reporter: self.reporter.clone(),
            factory: self.factory.clone(),
            trace: self.trace.clone(),
            shutdown: self.shutdown.clone(),
        };
        *handle = Some(tokio::spawn(run.run()));
        Ok(())
    }

    /// Stop polling and wait for in-flight jobs, up to the grace period.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.loop_handle.lock().take();
        let Some(handle) = handle else {
            bail!("Processor is not running");
        };

        self.trace.info("Processor will be stopped gracefully.");
        self.shutdown.cancel();

        if let Err(e) = handle.await {
            bail!("Processor loop terminated abnormally: {}", e);
        }

        self.trace.info("Processor is stopped.");
        Ok(())
    }
}

struct PollLoop {
    settings: Arc<ProcessorSettings>,
    poller: Arc<dyn MessagePoller>,
    reporter: Arc<dyn ResultReporter>,
    factory: MessageFactory,
    trace: Arc<dyn TraceWriter>,
    shutdown: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let workers = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut jobs = JoinSet::new();
        let mut throttler = ErrorThrottler::default();

        while !self.shutdown.is_cancelled() {
            while jobs.try_join_next().is_some() {}

            let free = workers.available_permits();
            if free == 0 {
                // Wait for a slot to open instead of polling for work we cannot take.
                tokio::select! {
                    _ = jobs.join_next() => {},
                    _ = self.shutdown.cancelled() => break,
                }
                continue;
            }

            let polled = tokio::select! {
                polled = self.poller.poll(free) => polled,
                _ = self.shutdown.cancelled() => break,
            };

            match polled {
                Ok(messages) if messages.is_empty() => {
                    throttler.reset();
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {},
                        _ = self.shutdown.cancelled() => {},
                    }
                }
                Ok(messages) => {
                    throttler.reset();
                    self.trace
                        .verbose(&format!("Received {} message(s)", messages.len()));
                    for message in messages {
                        let Ok(permit) = workers.clone().acquire_owned().await else {
                            break;
                        };
                        let job = self.build_job(message);
                        let trace = self.trace.clone();
                        jobs.spawn(async move {
                            run_job(job, trace).await;
                            drop(permit);
                        });
                    }
                }
                Err(e) => {
                    self.trace
                        .error(&format!("Could not poll messages from the queue: {}", e));
                    if !throttler.increment_and_wait(self.shutdown.clone()).await {
                        break;
                    }
                }
            }
        }

        self.drain(jobs).await;
    }

    fn build_job(&self, message: RawMessage) -> Job {
        Job::new(
            (self.factory)(message),
            self.poller.provider(),
            self.reporter.clone(),
            self.settings.api_key.clone(),
            self.settings.base_url.clone(),
            self.settings.owner_id.clone(),
        )
        .with_trace(self.trace.clone())
    }

    async fn drain(&self, mut jobs: JoinSet<()>) {
        if jobs.is_empty() {
            return;
        }

        self.trace.info(&format!(
            "Waiting up to {:.0}s for {} in-flight job(s)",
            self.settings.shutdown_grace_period.as_secs_f64(),
            jobs.len()
        ));

        let drained = tokio::time::timeout(self.settings.shutdown_grace_period, async {
            while jobs.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            self.trace.warning(&format!(
                "Abandoning {} job(s) still running after the grace period",
                jobs.len()
            ));
            jobs.abort_all();
        }
    }
}

/// Execute one job and log its terminal outcome with the message id and region.
async fn run_job(job: Job, trace: Arc<dyn TraceWriter>) {
    match job.execute().await {
        Ok(()) => trace.verbose(&format!(
            "Job[{}] from queue[{}] finished.",
            job.id(),
            job.region()
        )),
        Err(e @ JobError::AlreadyExecutingOrFinished { .. }) => trace.warning(&e.to_string()),
        Err(e) => trace.error(&format!(
            "Job[{}] from queue[{}] failed: {}",
            job.id(),
            job.region(),
            e
        )),
    }
}
