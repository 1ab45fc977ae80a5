// HttpClientFactory: builds the reqwest client used for control plane calls.

use crate::config_store::ProxySettings;
use crate::constants;

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Upper bound on a single control plane request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create a client honoring the configured proxy, with the agent user agent.
    pub fn create_client(proxy: &ProxySettings) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(constants::user_agent())
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT);

        if let Some(url) = proxy.url.as_deref().filter(|u| !u.trim().is_empty()) {
            let mut all = reqwest::Proxy::all(url)
                .with_context(|| format!("Invalid proxy URL '{}'", url))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                all = all.basic_auth(user, pass);
            }
            builder = builder.proxy(all);
        }

        builder.build().context("Failed to build HTTP client")
    }
}
