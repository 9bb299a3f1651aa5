//! Observability Configuration
//!
//! Log format and filter settings for the tracing subscriber.

use std::env;

use serde::Deserialize;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// JSON format for production/log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    /// Parse a format name, falling back to [`LogFormat::Pretty`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Log level filter (e.g., "info", "account_guard=debug,tower_http=info")
    pub log_filter: String,
    /// Wrap the router in a request tracing layer
    pub enable_request_tracing: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            enable_request_tracing: true,
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOG_FORMAT`: "pretty", "json", or "compact" (default: "pretty")
    /// - `LOG_FILTER`: Log filter directive used when `RUST_LOG` is unset (default: "info")
    /// - `TRACING_ENABLED`: Enable request tracing (default: "true")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.log_format),
            log_filter: env::var("LOG_FILTER").unwrap_or(defaults.log_filter),
            enable_request_tracing: env::var("TRACING_ENABLED")
                .ok()
                .and_then(|s| crate::parse::parse_flag(&s))
                .unwrap_or(defaults.enable_request_tracing),
        }
    }
}
