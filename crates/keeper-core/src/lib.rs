//! Core building blocks for the keeper GitHub App.
//!
//! - [`cache::LruCache`]: the bounded, process-wide cache shared by every
//!   in-flight webhook delivery
//! - [`config::AppConfig`]: bot settings sourced from the environment

pub mod cache;
pub mod config;

pub use cache::{LruCache, DEFAULT_CAPACITY};
pub use config::AppConfig;

use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
