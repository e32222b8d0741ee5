//! Error types for GitHub API access

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for GitHub API operations
pub type Result<T> = std::result::Result<T, GitHubError>;

/// Errors that can occur when talking to GitHub
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Network-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The identity's quota is used up
    #[error("Rate limit exceeded, resets at {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// App JWT could not be created
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Response body did not have the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// GraphQL request succeeded at the HTTP level but reported errors
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GitHubError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            GitHubError::Http(_) | GitHubError::RateLimited { .. } => true,
            GitHubError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GitHubError::Api { status, .. } => Some(*status),
            GitHubError::RateLimited { .. } => Some(403),
            GitHubError::Auth(_) => Some(401),
            GitHubError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(GitHubError::RateLimited { reset_at: None }.is_retryable());
        assert!(GitHubError::Api {
            status: 502,
            message: "Bad Gateway".to_string()
        }
        .is_retryable());
        assert!(!GitHubError::Api {
            status: 404,
            message: "Not Found".to_string()
        }
        .is_retryable());
        assert!(!GitHubError::Auth("Bad credentials".to_string()).is_retryable());
    }

    #[test]
    fn test_status_code() {
        let err = GitHubError::Api {
            status: 422,
            message: "Validation Failed".to_string(),
        };
        assert_eq!(err.status_code(), Some(422));
        assert_eq!(err.to_string(), "API error (422): Validation Failed");
        assert_eq!(GitHubError::GraphQl("boom".into()).status_code(), None);
    }
}
