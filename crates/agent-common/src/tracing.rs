// Named trace sources that mask secrets before handing lines to the `tracing` crate.

use crate::secret_masker::SecretMasker;
use chrono::Utc;

/// Diagnostic sink used by agent components.
///
/// Components take an `Arc<dyn TraceWriter>` so tests can substitute a
/// [`CollectingTraceWriter`] and assert on what was logged.
pub trait TraceWriter: Send + Sync {
    fn info(&self, message: &str);

    fn verbose(&self, message: &str);

    fn warning(&self, message: &str) {
        self.info(&format!("[warning] {message}"));
    }

    fn error(&self, message: &str) {
        self.info(&format!("[error] {message}"));
    }
}

/// A trace source for one component, e.g. `Job` or `Processor`.
///
/// Every line is prefixed with a UTC timestamp and the component name, and
/// passed through the shared [`SecretMasker`].
#[derive(Debug, Clone)]
pub struct Tracing {
    name: String,
    secret_masker: SecretMasker,
}

impl Tracing {
    pub fn new(name: impl Into<String>, secret_masker: SecretMasker) -> Self {
        Self {
            name: name.into(),
            secret_masker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn format(&self, message: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        format!(
            "[{}][{}] {}",
            timestamp,
            self.name,
            self.secret_masker.mask_secrets(message)
        )
    }
}

impl TraceWriter for Tracing {
    fn info(&self, message: &str) {
        ::tracing::info!("{}", self.format(message));
    }

    fn verbose(&self, message: &str) {
        ::tracing::debug!("{}", self.format(message));
    }

    fn warning(&self, message: &str) {
        ::tracing::warn!("{}", self.format(message));
    }

    fn error(&self, message: &str) {
        ::tracing::error!("{}", self.format(message));
    }
}

/// Hands out trace sources that all share one secret masker.
#[derive(Debug, Clone, Default)]
pub struct TraceManager {
    secret_masker: SecretMasker,
}

impl TraceManager {
    pub fn new(secret_masker: SecretMasker) -> Self {
        Self { secret_masker }
    }

    pub fn get(&self, name: &str) -> Tracing {
        Tracing::new(name, self.secret_masker.clone())
    }
}

/// Level of a collected trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Info,
    Verbose,
    Warning,
    Error,
}

/// A trace writer that records every line. Useful for tests.
#[derive(Debug, Default)]
pub struct CollectingTraceWriter {
    messages: parking_lot::Mutex<Vec<(TraceLevel, String)>>,
}

impl CollectingTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(TraceLevel, String)> {
        self.messages.lock().clone()
    }

    /// Lines recorded at `level`.
    pub fn at_level(&self, level: TraceLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn push(&self, level: TraceLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

impl TraceWriter for CollectingTraceWriter {
    fn info(&self, message: &str) {
        self.push(TraceLevel::Info, message);
    }

    fn verbose(&self, message: &str) {
        self.push(TraceLevel::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.push(TraceLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(TraceLevel::Error, message);
    }
}
