//! GitHub App authentication
//!
//! The App proves its identity with a short-lived RS256 JWT, then trades it
//! for an installation access token that authorizes API calls on behalf of
//! one installation.

use crate::{GitHubError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Tokens this close to expiry are treated as expired.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Backdating for `iat`, to tolerate clock drift against GitHub.
const JWT_BACKDATE_SECS: i64 = 60;

/// GitHub rejects App JWTs living longer than ten minutes.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

#[derive(Debug, Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// App id and private key
pub struct AppCredentials {
    app_id: u64,
    key: EncodingKey,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AppCredentials {
    /// Load credentials from a PEM-encoded RSA private key
    pub fn from_pem(app_id: u64, pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem)?;
        Ok(Self { app_id, key })
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    /// Sign an App JWT valid from slightly before `now`
    pub fn jwt(&self, now: DateTime<Utc>) -> Result<String> {
        let issued_at = now.timestamp() - JWT_BACKDATE_SECS;
        let claims = Claims {
            iat: issued_at,
            exp: now.timestamp() + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };

        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }
}

/// Everything about the App that is fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct AppIdentity {
    credentials: Arc<AppCredentials>,
    base_url: Url,
    repository: String,
}

impl AppIdentity {
    /// `api_url` may carry a path prefix, as GitHub Enterprise does.
    pub fn new(credentials: AppCredentials, api_url: &str, repository: &str) -> Result<Self> {
        let mut base_url = Url::parse(api_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GitHubError::Config(format!("{} cannot be a base URL", api_url)));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            credentials: Arc::new(credentials),
            base_url,
            repository: repository.to_string(),
        })
    }

    pub fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    /// API root, always ending in `/`
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `owner/name` of the repository the bot acts on
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

/// Installation access token as returned by GitHub
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: Secret<String>,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// Whether the token can still be handed out at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) > now
    }
}
