//! Security Event Logging
//!
//! Structured audit records for the authentication and request-signing
//! paths. Every event carries `security_event`, `category` and `severity`
//! fields so log pipelines can filter on them without parsing messages.
//!
//! # Usage
//!
//! ```ignore
//! use account_guard::observability::{SecurityEvent, security_event};
//!
//! security_event!(
//!     SecurityEvent::AuthenticationSuccess,
//!     user_id = user.id,
//!     app_id = %app_id,
//!     "User logged in"
//! );
//!
//! security_event!(
//!     SecurityEvent::SignatureRejected,
//!     app_id = %app_id,
//!     path = %path,
//!     "Request signature mismatch"
//! );
//! ```

use std::fmt;

/// Security event kinds emitted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication events
    /// Successful login
    AuthenticationSuccess,
    /// Failed login or rejected session token
    AuthenticationFailure,
    /// User logout
    Logout,
    /// Session token issued and stored
    SessionCreated,
    /// Session token revoked
    SessionDestroyed,

    // Authorization events
    /// Request admitted past the auth middleware
    AccessGranted,
    /// Request rejected by the auth middleware
    AccessDenied,
    /// Request signature missing or mismatched
    SignatureRejected,

    // User management events
    /// New user created on first login
    UserRegistered,
    /// Disabled account attempted access
    AccountLocked,
    /// Account status changed by an administrator
    AccountStatusChanged,

    // System events
    /// Session store timed out or failed
    StoreUnavailable,
    /// Application started
    SystemStartup,
    /// Application shutdown
    SystemShutdown,
}

impl SecurityEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess
            | Self::AuthenticationFailure
            | Self::Logout
            | Self::SessionCreated
            | Self::SessionDestroyed => "authentication",

            Self::AccessGranted
            | Self::AccessDenied
            | Self::SignatureRejected => "authorization",

            Self::UserRegistered
            | Self::AccountLocked
            | Self::AccountStatusChanged => "user_management",

            Self::StoreUnavailable
            | Self::SystemStartup
            | Self::SystemShutdown => "system",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            Self::StoreUnavailable => Severity::Critical,

            Self::AuthenticationFailure
            | Self::AccessDenied
            | Self::SignatureRejected
            | Self::AccountLocked => Severity::High,

            Self::AuthenticationSuccess
            | Self::UserRegistered
            | Self::AccountStatusChanged => Severity::Medium,

            Self::AccessGranted
            | Self::Logout
            | Self::SessionCreated
            | Self::SessionDestroyed
            | Self::SystemStartup
            | Self::SystemShutdown => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::Logout => "logout",
            Self::SessionCreated => "session_created",
            Self::SessionDestroyed => "session_destroyed",
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::SignatureRejected => "signature_rejected",
            Self::UserRegistered => "user_registered",
            Self::AccountLocked => "account_locked",
            Self::AccountStatusChanged => "account_status_changed",
            Self::StoreUnavailable => "store_unavailable",
            Self::SystemStartup => "system_startup",
            Self::SystemShutdown => "system_shutdown",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Log a security event with structured fields.
///
/// The macro adds `security_event`, `category` and `severity` to the record
/// and chooses the tracing level from the event's severity:
/// critical → `error`, high → `warn`, medium → `info`, low → `debug`.
///
/// ```ignore
/// security_event!(
///     SecurityEvent::AccessDenied,
///     path = %path,
///     reason = %reason,
///     "Request rejected"
/// );
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let severity = event.severity();
        let category = event.category();
        let event_name = event.name();

        match severity {
            $crate::observability::Severity::Critical => {
                ::tracing::error!(
                    security_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;
