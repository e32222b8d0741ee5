//! Event routing
//!
//! Maps a delivery's event kind and action to the handlers registered for
//! them. Handlers registered without an action fire for every action of
//! their event.

use crate::Delivery;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Error type handlers may return; anything `?`-able fits.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Router errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Handler for {event} failed: {source}")]
    Handler {
        event: String,
        #[source]
        source: BoxError,
    },
}

/// Handler for one kind of event
#[async_trait]
pub trait EventHandler<C: Sync>: Send + Sync {
    /// Act on a delivery using the installation's API client
    async fn handle(&self, delivery: &Delivery, client: &C) -> Result<(), BoxError>;
}

/// Anything that can take a delivery off the orchestrator's hands
#[async_trait]
pub trait EventRouter<C: Sync>: Send + Sync {
    /// Run the handling logic for one delivery. Called once per delivery.
    async fn dispatch(&self, delivery: &Delivery, client: &C) -> Result<(), RouterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    event: String,
    action: Option<String>,
}

impl RouteKey {
    fn new(event: &str, action: Option<&str>) -> Self {
        Self {
            event: event.to_string(),
            action: action.map(String::from),
        }
    }
}

/// Registry of handlers keyed by event kind and action
pub struct Router<C: Sync> {
    handlers: DashMap<RouteKey, Vec<Arc<dyn EventHandler<C>>>>,
}

impl<C: Sync> Router<C> {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for every action of `event`
    pub fn register(&self, event: &str, handler: Arc<dyn EventHandler<C>>) {
        self.register_route(RouteKey::new(event, None), handler);
    }

    /// Register a handler for one action of `event`
    pub fn register_action(&self, event: &str, action: &str, handler: Arc<dyn EventHandler<C>>) {
        self.register_route(RouteKey::new(event, Some(action)), handler);
    }

    fn register_route(&self, key: RouteKey, handler: Arc<dyn EventHandler<C>>) {
        info!(event = %key.event, action = ?key.action, "Registering event handler");
        self.handlers.entry(key).or_default().push(handler);
    }

    /// Handlers that fire for a delivery, event-wide ones first
    fn matching(&self, delivery: &Delivery) -> Vec<Arc<dyn EventHandler<C>>> {
        let mut found = Vec::new();

        if let Some(handlers) = self.handlers.get(&RouteKey::new(delivery.event_kind(), None)) {
            found.extend(handlers.iter().cloned());
        }
        if let Some(action) = delivery.action() {
            let key = RouteKey::new(delivery.event_kind(), Some(action));
            if let Some(handlers) = self.handlers.get(&key) {
                found.extend(handlers.iter().cloned());
            }
        }

        found
    }
}

impl<C: Sync> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: Sync> EventRouter<C> for Router<C> {
    async fn dispatch(&self, delivery: &Delivery, client: &C) -> Result<(), RouterError> {
        // Collected up front so no map guard is held across an await.
        let handlers = self.matching(delivery);

        if handlers.is_empty() {
            debug!(event = %delivery.kind_action(), "No handlers registered");
            return Ok(());
        }

        for handler in handlers {
            handler
                .handle(delivery, client)
                .await
                .map_err(|source| RouterError::Handler {
                    event: delivery.kind_action(),
                    source,
                })?;
        }

        Ok(())
    }
}
