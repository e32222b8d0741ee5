//! Client construction for each delivery

use crate::{AppIdentity, GitHubClient, GitHubError, RateLimit, Result, SharedCache};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the dispatcher needs to know about a client once handlers are done
pub trait ApiClient: Send + Sync {
    fn installation_id(&self) -> u64;

    fn rate_limit(&self) -> Option<RateLimit>;
}

impl ApiClient for GitHubClient {
    fn installation_id(&self) -> u64 {
        GitHubClient::installation_id(self)
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        GitHubClient::rate_limit(self)
    }
}

/// Builds one API client per delivery.
///
/// Implementations must not do network I/O here; credentials are obtained
/// lazily on the client's first call.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: ApiClient + 'static;

    fn build_client(&self, installation_id: u64) -> Result<Self::Client>;
}

/// Factory producing [`GitHubClient`]s that share one token cache
#[derive(Debug, Clone)]
pub struct GitHubClientFactory {
    identity: AppIdentity,
    cache: SharedCache,
    timeout: Duration,
}

impl GitHubClientFactory {
    pub fn new(identity: AppIdentity, cache: SharedCache) -> Self {
        Self {
            identity,
            cache,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout of sessions opened from now on
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Fresh session whose connections live as long as one delivery
    fn open_session(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(format!("keeper/{}", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
            .map_err(GitHubError::Http)
    }
}

impl ClientFactory for GitHubClientFactory {
    type Client = GitHubClient;

    fn build_client(&self, installation_id: u64) -> Result<GitHubClient> {
        let session = self.open_session()?;
        Ok(GitHubClient::new(
            installation_id,
            session,
            self.identity.clone(),
            self.cache.clone(),
        ))
    }
}
