//! Delivery authentication
//!
//! Verifies an inbound webhook call and parses it into a [`Delivery`].

use crate::{signature::SIGNATURE_HEADER, Result, WebhookError, WebhookVerifier};
use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use serde_json::Value;
use std::fmt;

/// Header carrying the event kind, e.g. `pull_request`.
pub const EVENT_HEADER: &str = "x-github-event";
/// Header carrying the unique delivery id.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Event kind GitHub sends when a webhook is first configured.
pub const PING_EVENT: &str = "ping";

/// One authenticated webhook occurrence
#[derive(Debug, Clone)]
pub struct Delivery {
    event_kind: String,
    action: Option<String>,
    delivery_id: String,
    raw_payload: Bytes,
    payload: Value,
    installation_id: Option<u64>,
}

impl Delivery {
    /// Event kind from the event header
    pub fn event_kind(&self) -> &str {
        &self.event_kind
    }

    /// `action` field of the payload, when the event has one
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    /// Body bytes exactly as received
    pub fn raw_payload(&self) -> &Bytes {
        &self.raw_payload
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// `installation.id` from the payload, absent for events not tied to one
    pub fn installation_id(&self) -> Option<u64> {
        self.installation_id
    }

    /// Installation id, or an error for payloads that carry none
    pub fn require_installation_id(&self) -> Result<u64> {
        self.installation_id
            .ok_or(WebhookError::MissingField("installation.id"))
    }

    /// Liveness check from GitHub rather than a real event
    pub fn is_ping(&self) -> bool {
        self.event_kind == PING_EVENT
    }

    /// `kind:action`, or just `kind` for events without an action
    pub fn kind_action(&self) -> String {
        match &self.action {
            Some(action) => format!("{}:{}", self.event_kind, action),
            None => self.event_kind.clone(),
        }
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind_action(), self.delivery_id)
    }
}

/// Verify and parse one webhook call.
///
/// With a verifier, the signature header is required and checked before the
/// body is parsed. Without one, signatures are not checked, and a request
/// that carries a signature anyway is rejected rather than silently trusted.
pub fn authenticate(
    headers: &HeaderMap,
    raw_body: Bytes,
    verifier: Option<&WebhookVerifier>,
) -> Result<Delivery> {
    check_content_type(headers)?;

    match (verifier, header_value(headers, SIGNATURE_HEADER)) {
        (Some(verifier), Some(signature)) => verifier.verify(&raw_body, signature)?,
        (Some(_), None) => return Err(WebhookError::MissingHeader(SIGNATURE_HEADER)),
        (None, Some(_)) => return Err(WebhookError::UnexpectedSignature),
        (None, None) => {}
    }

    let payload: Value = serde_json::from_slice(&raw_body)?;

    let event_kind = header_value(headers, EVENT_HEADER)
        .ok_or(WebhookError::MissingHeader(EVENT_HEADER))?
        .to_string();
    let delivery_id = header_value(headers, DELIVERY_HEADER)
        .ok_or(WebhookError::MissingHeader(DELIVERY_HEADER))?
        .to_string();

    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .map(String::from);
    let installation_id = payload
        .pointer("/installation/id")
        .and_then(Value::as_u64);

    Ok(Delivery {
        event_kind,
        action,
        delivery_id,
        raw_payload: raw_body,
        payload,
        installation_id,
    })
}

fn check_content_type(headers: &HeaderMap) -> Result<()> {
    let content_type = header_value(headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();

    if essence.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        let received = if essence.is_empty() { "<none>" } else { essence };
        Err(WebhookError::UnsupportedContentType(received.to_string()))
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
