use ::config::{Config, Environment};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

use crate::{CoreError, Result};

/// Repository the bot acts on unless told otherwise.
pub const DEFAULT_REPOSITORY: &str = "dhruvmanila/algorithms-keeper";

/// Where `GET /` sends visitors.
pub const DEFAULT_SOURCE_CODE_URL: &str = "https://github.com/dhruvmanila/algorithms-keeper";

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Bot configuration, read once at startup.
///
/// Every field maps to an upper-case environment variable of the same name,
/// e.g. `github_app_id` is read from `GITHUB_APP_ID`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Webhook secret. When absent, payload signatures are not checked.
    #[serde(default)]
    pub github_secret: Option<Secret<String>>,
    /// Numeric GitHub App identifier, the `iss` of App JWTs.
    pub github_app_id: u64,
    /// PEM-encoded App private key.
    pub github_private_key: Secret<String>,
    /// `owner/name` of the repository the bot acts on.
    pub github_repository: String,
    pub github_api_url: String,
    /// Shared cache bound.
    pub cache_capacity: usize,
    /// Wait before routing each delivery, so reads of the triggering
    /// resource observe the write that caused the event.
    pub consistency_delay_ms: u64,
    /// Upper bound on a single router invocation.
    pub dispatch_timeout_secs: u64,
    pub source_code_url: String,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::default())
    }

    /// Load configuration from an explicit environment source
    pub fn load_from(environment: Environment) -> Result<Self> {
        let config = Config::builder()
            .set_default("github_repository", DEFAULT_REPOSITORY)?
            .set_default("github_api_url", DEFAULT_API_URL)?
            .set_default("cache_capacity", crate::cache::DEFAULT_CAPACITY as i64)?
            .set_default("consistency_delay_ms", 1000)?
            .set_default("dispatch_timeout_secs", 60)?
            .set_default("source_code_url", DEFAULT_SOURCE_CODE_URL)?
            .add_source(environment.try_parsing(true))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }

        if self.dispatch_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "dispatch_timeout_secs must be at least 1".to_string(),
            ));
        }

        match self.github_repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(())
            }
            _ => Err(CoreError::InvalidConfig(format!(
                "github_repository must look like owner/name, got {:?}",
                self.github_repository
            ))),
        }
    }

    pub fn consistency_delay(&self) -> Duration {
        Duration::from_millis(self.consistency_delay_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}
