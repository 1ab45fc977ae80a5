// Agent: wires configuration, tracing, the runbook repository and the processor,
// and runs it until the process is asked to shut down.

use crate::action::{ActionContext, ActionQueueMessage};
use crate::message::QueueMessage;
use crate::processor::{MessageFactory, MessagePoller, Processor, ProcessorSettings};
use crate::reporter::{HttpResultReporter, ResultReporter};
use crate::repository::{Cloner, RepositoryFetcher};

use agent_common::constants::VERSION;
use agent_common::{
    logging, AgentSettings, ConfigurationStore, HttpClientFactory, SecretMasker, TraceManager,
    TraceWriter, Tracing,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One running agent instance bound to one queue.
pub struct Agent {
    processor: Processor,
    repository_dir: Option<PathBuf>,
    trace: Tracing,
}

impl Agent {
    /// Build an agent from settings, reporting results over HTTP.
    ///
    /// Clones the runbook repository first when one is configured.
    pub async fn new(
        settings: AgentSettings,
        poller: Arc<dyn MessagePoller>,
        cloner: Arc<dyn Cloner>,
    ) -> Result<Self> {
        let client = HttpClientFactory::create_client(&settings.proxy)?;
        let reporter = Arc::new(HttpResultReporter::new(client));
        Self::with_reporter(settings, poller, cloner, reporter).await
    }

    /// Like [`new`](Self::new) with an explicit result reporter.
    pub async fn with_reporter(
        settings: AgentSettings,
        poller: Arc<dyn MessagePoller>,
        cloner: Arc<dyn Cloner>,
        reporter: Arc<dyn ResultReporter>,
    ) -> Result<Self> {
        settings.validate().context("Invalid agent configuration")?;

        let traces = TraceManager::new(secret_masker(&settings));
        let trace = traces.get("Agent");
        let app_name = if settings.app_name.is_empty() {
            "Action agent"
        } else {
            settings.app_name.as_str()
        };
        trace.info(&format!("{} {} is starting.", app_name, VERSION));

        let repository_dir = match &settings.repository {
            Some(repository) => {
                let dir = RepositoryFetcher::new(cloner)
                    .clone_master(
                        &repository.url,
                        repository.private_key_filepath.as_deref(),
                        repository.passphrase.as_deref(),
                    )
                    .await
                    .with_context(|| {
                        format!("Could not clone runbook repository '{}'", repository.url)
                    })?;
                trace.info(&format!(
                    "Runbook repository is cloned into {}",
                    dir.display()
                ));
                Some(dir)
            }
            None => None,
        };

        let context = ActionContext {
            mappings: Arc::new(settings.action_mappings.clone()),
            repository_root: repository_dir.clone(),
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            trace: Arc::new(traces.get("Action")),
        };
        let factory: MessageFactory = Arc::new(move |message| {
            Box::new(ActionQueueMessage::new(message, context.clone())) as Box<dyn QueueMessage>
        });

        let processor = Processor::new(
            ProcessorSettings::from(&settings),
            poller,
            reporter,
            factory,
            Arc::new(traces.get("Processor")),
        );

        Ok(Self {
            processor,
            repository_dir,
            trace,
        })
    }

    /// Entry point for agent binaries.
    ///
    /// Reads the configuration named by `AGENT_CONF_PATH` and runs until
    /// SIGINT or SIGTERM. `connect` builds the queue poller from the loaded
    /// settings.
    pub async fn run_until_shutdown<C>(connect: C, cloner: Arc<dyn Cloner>) -> Result<()>
    where
        C: FnOnce(&AgentSettings) -> Result<Arc<dyn MessagePoller>>,
    {
        let store = ConfigurationStore::from_env()?;
        Self::run_from_config(&store, connect, cloner, shutdown_signal()).await
    }

    /// Load `store`, install logging, then run until `shutdown` resolves.
    pub async fn run_from_config<C, F>(
        store: &ConfigurationStore,
        connect: C,
        cloner: Arc<dyn Cloner>,
        shutdown: F,
    ) -> Result<()>
    where
        C: FnOnce(&AgentSettings) -> Result<Arc<dyn MessagePoller>>,
        F: Future<Output = Result<&'static str>>,
    {
        let settings = store.load().with_context(|| {
            format!("Could not load configuration from {}", store.path().display())
        })?;
        logging::init(&settings.log_level, settings.log_json)?;

        let poller = connect(&settings).context("Could not connect to the queue")?;
        let mut agent = Self::new(settings, poller, cloner).await?;
        agent.run_until(shutdown).await
    }

    /// Start processing, wait for `shutdown`, then stop gracefully.
    ///
    /// The agent is stopped even when waiting for the signal failed.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        self.start()?;

        let received = shutdown.await;
        match &received {
            Ok(signal) => self.trace.info(&format!(
                "{} received. Stopping action agent {}.",
                signal, VERSION
            )),
            Err(e) => self
                .trace
                .error(&format!("Could not wait for a shutdown signal: {:#}", e)),
        }

        self.stop().await?;
        received.map(|_| ())
    }

    pub fn start(&self) -> Result<()> {
        self.processor.start()
    }

    /// Stop the processor and remove the cloned repository.
    pub async fn stop(&mut self) -> Result<()> {
        let stopped = self.processor.stop().await;
        self.remove_repository();
        stopped
    }

    pub fn repository_dir(&self) -> Option<&Path> {
        self.repository_dir.as_deref()
    }

    fn remove_repository(&mut self) {
        if let Some(dir) = self.repository_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                self.trace.warning(&format!(
                    "Could not remove runbook repository {}: {}",
                    dir.display(),
                    e
                ));
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.remove_repository();
    }
}

/// Resolve on SIGINT (Ctrl-C) or, on unix, SIGTERM. Yields the signal name.
pub async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("Failed to listen for Ctrl-C")?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        Ok("Ctrl-C")
    }
}

/// Secrets from the configuration that must never reach the logs.
fn secret_masker(settings: &AgentSettings) -> SecretMasker {
    let masker = SecretMasker::new();
    masker.add_value(&settings.api_key);
    if let Some(passphrase) = settings
        .repository
        .as_ref()
        .and_then(|r| r.passphrase.as_deref())
    {
        masker.add_value(passphrase);
    }
    masker
}
