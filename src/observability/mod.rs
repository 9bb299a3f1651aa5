//! Observability Infrastructure
//!
//! Structured logging for the account service. Application code uses the
//! standard `tracing` macros, and security-relevant outcomes go through
//! [`security_event!`] so they carry consistent audit fields.
//!
//! # Usage
//!
//! ```ignore
//! use account_guard::observability::{ObservabilityConfig, init};
//!
//! let config = ObservabilityConfig::from_env();
//! init(&config)?;
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig};
pub use events::{security_event, SecurityEvent, Severity};

use tracing::info;

/// Initialize logging.
///
/// Call once at startup, before anything logs. A second call fails because a
/// global subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );

    Ok(())
}

/// Observability initialization errors
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("Observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("Provider error: {0}")]
    Provider(String),
}
