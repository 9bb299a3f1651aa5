//! Error taxonomy and structured failure responses
//!
//! Every failure that reaches a client is rendered as
//!
//! ```json
//! {"ok": false, "reason": "ERR_TOKEN_EXPIRED", "errmsg": "optional detail"}
//! ```
//!
//! with an HTTP status derived from the reason code alone. Successful
//! handlers answer with `{"ok": true, "reason": "", "data": {...}}`.
//!
//! Authentication failures are modelled as [`AuthError`] and converted to
//! [`ApiError`] at the middleware boundary by an explicit `From` impl. Nothing
//! in the request path panics to signal a rejection.
//!
//! # Usage
//!
//! ```ignore
//! use account_guard::error::{ApiError, ApiResponse, Reason};
//!
//! async fn handler() -> account_guard::error::Result<serde_json::Value> {
//!     let user = lookup().await.ok_or_else(|| ApiError::new(Reason::ObjectNotFound))?;
//!     Ok(ApiResponse(serde_json::json!({ "userInfo": user })))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::sms::CodeError;
use crate::store::StoreError;
use crate::token::TokenError;

// ============================================================================
// Reason codes
// ============================================================================

/// Client-facing failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    ArgsInvalid,
    ArgsMissing,
    ServerError,
    SignError,
    TokenInvalid,
    TokenExpired,
    TokenOfflined,
    ObjectNotFound,
    CodeInvalid,
    UserIsLocked,
}

impl Reason {
    /// Wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArgsInvalid => "ERR_ARGS_INVALID",
            Self::ArgsMissing => "ERR_ARGS_MISSING",
            Self::ServerError => "ERR_SERVER_ERROR",
            Self::SignError => "ERR_SIGN_ERROR",
            Self::TokenInvalid => "ERR_TOKEN_INVALID",
            Self::TokenExpired => "ERR_TOKEN_EXPIRED",
            Self::TokenOfflined => "ERR_TOKEN_OFFLINED",
            Self::ObjectNotFound => "ERR_OBJECT_NOT_FOUND",
            Self::CodeInvalid => "ERR_CODE_INVALID",
            Self::UserIsLocked => "ERR_USER_IS_LOCKED",
        }
    }

    /// HTTP status for the code. Anything not listed answers 200 with `ok: false`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ArgsInvalid | Self::ArgsMissing => StatusCode::BAD_REQUEST,
            Self::SignError | Self::TokenInvalid | Self::TokenExpired | Self::TokenOfflined => {
                StatusCode::UNAUTHORIZED
            }
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ObjectNotFound | Self::CodeInvalid | Self::UserIsLocked => StatusCode::OK,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Authentication errors
// ============================================================================

/// Why a request failed authentication or signature verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required header was absent
    #[error("missing {0}")]
    MissingArgument(&'static str),

    /// AppID header names no registered application
    #[error("unknown application")]
    UnknownApp,

    /// Route needs a session and none was presented
    #[error("token missing")]
    MissingToken,

    /// Admin secret header did not match
    #[error("admin token mismatch")]
    AdminTokenMismatch,

    /// Token could not be decoded
    #[error("malformed token: {0}")]
    Format(#[from] TokenError),

    /// Embedded expire time is in the past
    #[error("token expired")]
    Expired,

    /// Token decodes but the session store no longer holds it
    #[error("session not live")]
    NotLive,

    /// Token refers to a user that no longer exists
    #[error("account deleted")]
    AccountDeleted,

    /// Token refers to a disabled user
    #[error("account locked")]
    AccountLocked,

    /// Signature header missing or does not match the request
    #[error("signature mismatch")]
    Integrity,

    /// Session store timed out or failed
    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AuthError {
    /// The client-facing code for this failure.
    pub fn reason(&self) -> Reason {
        match self {
            Self::MissingArgument(_) | Self::UnknownApp => Reason::ArgsInvalid,
            Self::MissingToken | Self::AdminTokenMismatch | Self::Format(_) => Reason::TokenInvalid,
            Self::Expired | Self::NotLive | Self::AccountDeleted => Reason::TokenExpired,
            Self::AccountLocked => Reason::UserIsLocked,
            Self::Integrity => Reason::SignError,
            Self::StoreUnavailable(_) => Reason::ServerError,
        }
    }
}

// ============================================================================
// API error
// ============================================================================

/// A failure rendered as `{"ok": false, "reason": ..., "errmsg": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub reason: Reason,
    /// Message shown to the client
    pub errmsg: Option<String>,
    /// Logged, never sent
    pub details: Option<String>,
    /// Overrides the status derived from `reason`
    pub status: Option<StatusCode>,
}

impl ApiError {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            errmsg: None,
            details: None,
            status: None,
        }
    }

    pub fn with_msg(reason: Reason, errmsg: impl Into<String>) -> Self {
        Self {
            reason,
            errmsg: Some(errmsg.into()),
            details: None,
            status: None,
        }
    }

    /// A 500 whose cause is logged but not exposed.
    pub fn internal(source: impl fmt::Display) -> Self {
        Self {
            reason: Reason::ServerError,
            errmsg: Some("server error, please try again later".to_string()),
            details: Some(source.to_string()),
            status: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Answer with `status` instead of the one derived from the reason.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.reason.status_code())
    }

    fn log(&self) {
        let details = self.details.as_deref().unwrap_or("none");
        match self.reason {
            Reason::ServerError => {
                tracing::error!(reason = %self.reason, details = %details, "Server error");
            }
            Reason::SignError | Reason::TokenInvalid | Reason::TokenExpired | Reason::UserIsLocked => {
                tracing::warn!(reason = %self.reason, details = %details, "Auth error");
            }
            _ => {
                tracing::debug!(reason = %self.reason, details = %details, "Client error");
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.errmsg {
            Some(msg) => write!(f, "{}: {}", self.reason, msg),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl std::error::Error for ApiError {}

/// JSON failure body
#[derive(Debug, Serialize)]
struct FailureBody {
    ok: bool,
    reason: Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    errmsg: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = FailureBody {
            ok: false,
            reason: self.reason,
            errmsg: self.errmsg,
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let reason = err.reason();
        let details = err.to_string();
        match err {
            AuthError::AccountDeleted => {
                ApiError::with_msg(reason, "account has been deleted").with_details(details)
            }
            AuthError::AccountLocked => {
                ApiError::with_msg(reason, "account is locked").with_details(details)
            }
            AuthError::StoreUnavailable(source) => ApiError::internal(source),
            // Rejected by the middleware, so 401 rather than the handler 400.
            AuthError::MissingArgument(_) | AuthError::UnknownApp => {
                ApiError::new(reason).with_details(details).with_status(StatusCode::UNAUTHORIZED)
            }
            _ => ApiError::new(reason).with_details(details),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::internal(err)
    }
}

impl From<CodeError> for ApiError {
    fn from(err: CodeError) -> Self {
        match err {
            CodeError::Invalid => ApiError::with_msg(Reason::CodeInvalid, "verification code invalid"),
            CodeError::Store(source) => ApiError::internal(source),
        }
    }
}

// ============================================================================
// Success envelope
// ============================================================================

/// A success rendered as `{"ok": true, "reason": "", "data": ...}`.
#[derive(Debug)]
pub struct ApiResponse<T>(pub T);

#[derive(Serialize)]
struct SuccessBody<T> {
    ok: bool,
    reason: &'static str,
    data: T,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(SuccessBody {
            ok: true,
            reason: "",
            data: self.0,
        })
        .into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<ApiResponse<T>, ApiError>;

// ============================================================================
// Tests
// ============================================================================
