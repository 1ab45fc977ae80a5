// agent-common: Shared infrastructure for the action agent.
// Configuration, secret-aware tracing, logging setup and HTTP client creation.
// Depended on by `agent-queue`.

pub mod action_result;
pub mod config_store;
pub mod constants;
pub mod http_client_factory;
pub mod logging;
pub mod secret_masker;
pub mod tracing;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use action_result::ActionResult;
pub use config_store::{
    ActionMapping, AgentSettings, ConfigError, ConfigurationStore, ProxySettings,
    RepositorySettings,
};
pub use http_client_factory::HttpClientFactory;
pub use secret_masker::SecretMasker;
pub use crate::tracing::{CollectingTraceWriter, TraceLevel, TraceManager, TraceWriter, Tracing};
