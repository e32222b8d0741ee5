//! Command-line argument parsing
//!
//! Only process-level settings live here. Bot settings (App credentials,
//! repository, cache size, delays) are read by [`keeper_core::AppConfig`].

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "keeper-server",
    about = "Webhook server for the keeper GitHub App",
    version
)]
pub struct Args {
    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(["trace", "debug", "info", "warn", "error"])
            .map(|level| level.to_lowercase())
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// OTLP collector receiving error and trace telemetry
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}
