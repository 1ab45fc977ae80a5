// Well-known names shared by the agent crates.

/// Agent version, taken from the workspace package version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Message attribute carrying the owner (customer account) a message is meant for.
pub const OWNER_ID_ATTRIBUTE: &str = "ownerId";

/// Control plane path that receives action execution results.
pub const ACTION_RESULT_PATH: &str = "/v2/integrations/oec/actionExecutionResult";

/// Control plane used when the configuration does not name one.
pub const DEFAULT_BASE_URL: &str = "https://api.opsgenie.com";

/// Prefix of the temporary directory a runbook repository is cloned into.
pub const REPOSITORY_DIR_PREFIX: &str = "oec";

/// Branch checked out when cloning a runbook repository.
pub const REPOSITORY_BRANCH: &str = "master";

/// Action mapping source type whose filepath is relative to the runbook repository.
pub const GIT_SOURCE_TYPE: &str = "git";

/// Environment variables read by the configuration store.
pub mod env {
    pub const CONF_PATH: &str = "AGENT_CONF_PATH";
    pub const API_KEY: &str = "AGENT_API_KEY";
    pub const BASE_URL: &str = "AGENT_BASE_URL";
    pub const OWNER_ID: &str = "AGENT_OWNER_ID";
    pub const LOG_LEVEL: &str = "AGENT_LOG_LEVEL";
}

/// User agent sent with every control plane request.
pub fn user_agent() -> String {
    format!(
        "action-agent/{} ({}/{})",
        VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
