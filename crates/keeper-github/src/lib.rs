//! GitHub API access for the keeper GitHub App
//!
//! Every webhook delivery gets its own [`GitHubClient`], bound to one App
//! installation and one network session. Clients share a process-wide
//! [`SharedCache`] holding installation access tokens and conditional
//! request metadata, so tokens minted for one delivery are reused by the
//! next one for the same installation.

pub mod auth;
pub mod cache;
pub mod client;
pub mod error;
pub mod factory;
pub mod rate_limit;

pub use auth::{AppCredentials, AppIdentity, InstallationToken};
pub use cache::{response_key, shared_cache, token_key, CacheValue, CachedResponse, SharedCache};
pub use client::GitHubClient;
pub use error::{GitHubError, Result};
pub use factory::{ApiClient, ClientFactory, GitHubClientFactory};
pub use rate_limit::RateLimit;
