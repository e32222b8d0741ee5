//! Webhook ingestion for the keeper GitHub App
//!
//! This crate turns a raw webhook call into something the bot can act on:
//! - Signature verification against the shared webhook secret
//! - Envelope parsing into a typed [`Delivery`]
//! - Event routing to handlers registered by event kind and action
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_webhook::{authenticate, WebhookVerifier};
//!
//! let verifier = WebhookVerifier::new("secret");
//! let delivery = authenticate(&headers, body, Some(&verifier))?;
//! if delivery.is_ping() {
//!     return Ok(StatusCode::OK);
//! }
//! router.dispatch(&delivery, &client).await?;
//! ```

pub mod delivery;
pub mod router;
pub mod signature;

pub use delivery::*;
pub use router::*;
pub use signature::*;

use thiserror::Error;

/// Errors raised while authenticating and parsing a delivery
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Payload is signed but no webhook secret is configured")]
    UnexpectedSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Missing payload field: {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
