//! Application wiring

use anyhow::{Context, Result};
use keeper_core::AppConfig;
use keeper_github::{shared_cache, AppCredentials, AppIdentity, GitHubClient, GitHubClientFactory};
use keeper_webhook::{EventRouter, Router as EventRegistry, WebhookVerifier};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::Args;
use crate::dispatch::Dispatcher;
use crate::server::{build_router, serve, HttpState};

/// Main application
pub struct App {
    args: Args,
    state: HttpState<GitHubClientFactory>,
}

impl App {
    /// Build the application from the environment with no handlers registered
    pub fn build(args: Args) -> Result<Self> {
        let config = AppConfig::load().context("Invalid configuration")?;
        Self::with_router(args, config, Arc::new(EventRegistry::<GitHubClient>::new()))
    }

    /// Build the application around an existing event router
    pub fn with_router(
        args: Args,
        config: AppConfig,
        router: Arc<dyn EventRouter<GitHubClient>>,
    ) -> Result<Self> {
        let factory = client_factory(&config)?;

        let verifier = config.github_secret.as_ref().map(WebhookVerifier::from);
        if verifier.is_none() {
            warn!("GITHUB_SECRET is not set, webhook signatures will not be verified");
        }

        let dispatcher = Dispatcher::new(verifier, factory, router)
            .with_consistency_delay(config.consistency_delay())
            .with_dispatch_timeout(config.dispatch_timeout());

        let state = HttpState {
            dispatcher: Arc::new(dispatcher),
            source_code_url: Arc::from(config.source_code_url.as_str()),
        };

        Ok(Self { args, state })
    }

    /// Run the application until shutdown
    pub async fn run(self) -> Result<()> {
        info!("HTTP port: {}", self.args.port);
        serve(build_router(self.state), self.args.port).await
    }
}

/// Client factory backed by a fresh shared cache
pub fn client_factory(config: &AppConfig) -> Result<GitHubClientFactory> {
    // Keys passed through single-line env files keep their newlines escaped.
    let pem = config.github_private_key.expose_secret().replace("\\n", "\n");
    let credentials = AppCredentials::from_pem(config.github_app_id, pem.as_bytes())
        .context("Failed to load GitHub App private key")?;

    let identity = AppIdentity::new(credentials, &config.github_api_url, &config.github_repository)
        .context("Invalid GitHub API URL")?;

    info!(
        app_id = config.github_app_id,
        repository = %config.github_repository,
        cache_capacity = config.cache_capacity,
        "GitHub App configured"
    );

    Ok(GitHubClientFactory::new(
        identity,
        shared_cache(config.cache_capacity),
    ))
}
