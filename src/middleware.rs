//! Authentication middleware
//!
//! Two axum middleware functions gate every route according to its
//! [`RouteRule`](crate::policy::RouteRule):
//!
//! - [`verify_signature`] runs first and checks the canonical request
//!   signature on routes marked `signed`.
//! - [`authorize`] enforces the route's [`TrustLevel`] and binds the caller's
//!   [`Identity`] into request extensions.
//!
//! Per request the outcome is one of:
//!
//! ```text
//! Unauthenticated ──► Anonymous       (None route, no token)
//!                 ├─► Authenticated   (token decrypts, not expired, live, user active)
//!                 └─► Rejected        (structured JSON failure, pipeline stops)
//! ```
//!
//! `OPTIONS` requests pass through both stages untouched. Every other
//! request admitted by [`authorize`] also carries the caller's
//! [`ClientMeta`].
//!
//! # Usage
//!
//! ```ignore
//! use axum::{middleware, Router};
//! use account_guard::middleware::{authorize, verify_signature, AuthState};
//!
//! let app = Router::new()
//!     .route("/v1/account/user/userinfo", get(user_info))
//!     .layer(middleware::from_fn_with_state(auth.clone(), authorize))
//!     .layer(middleware::from_fn_with_state(auth, verify_signature));
//! ```
//!
//! Layers added later run first, so `verify_signature` sees the request
//! before `authorize`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header::CONTENT_TYPE, request::Parts, Extensions, HeaderMap, Method},
    middleware::Next,
    response::Response,
};

use crate::clock::Clock;
use crate::config::{
    AuthConfig, ConfigError, HEADER_APP_ID, HEADER_CHANNEL, HEADER_DEVICE_ID, HEADER_PLATFORM, HEADER_SIGN,
    HEADER_TOKEN, HEADER_VERSION,
};
use crate::crypto::constant_time_str_eq;
use crate::error::{ApiError, AuthError, Reason};
use crate::observability::{security_event, SecurityEvent};
use crate::policy::{RouteTrustPolicy, TrustLevel};
use crate::session::{token_prefix, SessionError, SessionStore};
use crate::signing::{AppKeyRegistry, MultiMap, RequestSigner, SignedRequest};
use crate::token::TokenCodec;
use crate::users::{ClientMeta, UserDirectory, UserRecord};

// ============================================================================
// Request context
// ============================================================================

/// The authenticated caller, bound by [`authorize`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub user_type: i16,
    pub token: String,
    pub user: UserRecord,
}

/// Calling application, bound when the AppID header is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppId(pub String);

impl<S> axum::extract::FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::new(Reason::TokenInvalid))
    }
}

impl<S> axum::extract::FromRequestParts<S> for AppId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AppId>()
            .cloned()
            .ok_or_else(|| ApiError::new(Reason::ArgsInvalid))
    }
}

impl<S> axum::extract::FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ClientMeta>().cloned().unwrap_or_default())
    }
}

// ============================================================================
// State
// ============================================================================

/// Full names of the custom headers, resolved once from the prefix.
#[derive(Debug, Clone)]
struct HeaderNames {
    token: String,
    app_id: String,
    sign: String,
    platform: String,
    version: String,
    channel: String,
    device_id: String,
}

/// Everything the middleware needs, shared across requests.
#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<AuthConfig>,
    pub codec: TokenCodec,
    pub sessions: SessionStore,
    pub users: Arc<dyn UserDirectory>,
    pub signer: RequestSigner,
    pub app_keys: AppKeyRegistry,
    pub policy: Arc<RouteTrustPolicy>,
    pub clock: Arc<dyn Clock>,
    headers: HeaderNames,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("app_keys", &self.app_keys)
            .field("routes", &self.policy.len())
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Fails if the token codec cannot be built from `config`.
    pub fn new(
        config: Arc<AuthConfig>,
        sessions: SessionStore,
        users: Arc<dyn UserDirectory>,
        policy: RouteTrustPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let codec = config.token_codec()?;
        let headers = HeaderNames {
            token: config.header_name(HEADER_TOKEN),
            app_id: config.header_name(HEADER_APP_ID),
            sign: config.header_name(HEADER_SIGN),
            platform: config.header_name(HEADER_PLATFORM),
            version: config.header_name(HEADER_VERSION),
            channel: config.header_name(HEADER_CHANNEL),
            device_id: config.header_name(HEADER_DEVICE_ID),
        };
        let signer = RequestSigner::new(&config.signed_headers, &config.header_prefix, &headers.sign);
        let app_keys = AppKeyRegistry::new(config.app_keys.clone());

        Ok(Self {
            codec,
            sessions,
            users,
            signer,
            app_keys,
            policy: Arc::new(policy),
            clock,
            headers,
            config,
        })
    }

    /// Client details from the custom headers and the remote address.
    /// Absent values are empty.
    pub fn client_meta(&self, headers: &HeaderMap, extensions: &Extensions) -> ClientMeta {
        let header = |name: &str| header_value(headers, name).unwrap_or_default();
        ClientMeta {
            platform: header(&self.headers.platform),
            version: header(&self.headers.version),
            channel: header(&self.headers.channel),
            device_id: header(&self.headers.device_id),
            ip: client_ip(headers, extensions),
        }
    }

    /// Apply a route's trust level to the presented token.
    ///
    /// Returns `Ok(None)` for anonymous and admin callers.
    pub async fn resolve(&self, trust: TrustLevel, token: Option<&str>) -> Result<Option<Identity>, AuthError> {
        match (trust, token) {
            (TrustLevel::Admin, token) => {
                self.check_admin(token.unwrap_or_default())?;
                Ok(None)
            }
            (TrustLevel::None, None) => Ok(None),
            (TrustLevel::User, None) => Err(AuthError::MissingToken),
            (_, Some(token)) => self.authenticate(token).await.map(Some),
        }
    }

    fn check_admin(&self, presented: &str) -> Result<(), AuthError> {
        // An unset admin secret locks the admin routes.
        if self.config.admin_token.is_empty() || !constant_time_str_eq(presented, &self.config.admin_token) {
            return Err(AuthError::AdminTokenMismatch);
        }
        Ok(())
    }

    /// Decrypt the token, then check expiry, liveness and the user's status.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.codec.decrypt(token)?;

        if claims.is_expired_at(self.clock.now()) {
            return Err(AuthError::Expired);
        }

        match self.sessions.check_live(token, claims.user_id).await {
            Ok(()) => {}
            Err(SessionError::Store(err)) => return Err(AuthError::StoreUnavailable(err)),
            Err(_) => return Err(AuthError::NotLive),
        }

        let user = self
            .users
            .get_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::AccountDeleted)?;
        if user.is_disabled() {
            return Err(AuthError::AccountLocked);
        }

        Ok(Identity {
            user_id: claims.user_id,
            user_type: claims.user_type,
            token: token.to_string(),
            user,
        })
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_default()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Trust level
// ============================================================================

/// Enforce the route's trust level.
pub async fn authorize(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let trust = state.policy.rule(&path).trust;
    let app_id = header_value(request.headers(), &state.headers.app_id);

    if trust > TrustLevel::None && app_id.is_none() {
        security_event!(
            SecurityEvent::AccessDenied,
            path = %path,
            reason = %Reason::ArgsInvalid,
            "Request without application ID"
        );
        return Err(AuthError::MissingArgument(HEADER_APP_ID).into());
    }

    let token = header_value(request.headers(), &state.headers.token);
    match state.resolve(trust, token.as_deref()).await {
        Ok(identity) => {
            if let Some(identity) = identity {
                tracing::debug!(
                    user_id = identity.user_id,
                    user_type = identity.user_type,
                    path = %path,
                    "Session authenticated"
                );
                request.extensions_mut().insert(identity);
            } else if trust == TrustLevel::Admin {
                security_event!(SecurityEvent::AccessGranted, path = %path, "Admin request admitted");
            }
        }
        Err(err) => {
            log_rejection(&err, &path, token.as_deref());
            return Err(err.into());
        }
    }

    if let Some(app_id) = app_id {
        request.extensions_mut().insert(AppId(app_id));
    }
    let meta = state.client_meta(request.headers(), request.extensions());
    request.extensions_mut().insert(meta);

    Ok(next.run(request).await)
}

fn log_rejection(err: &AuthError, path: &str, token: Option<&str>) {
    let token = token.map(token_prefix).unwrap_or_default();
    match err {
        AuthError::StoreUnavailable(source) => {
            security_event!(
                SecurityEvent::StoreUnavailable,
                path = %path,
                error = %source,
                "Session store unavailable; rejecting request"
            );
        }
        AuthError::AccountLocked => {
            security_event!(
                SecurityEvent::AccountLocked,
                path = %path,
                token = %token,
                "Disabled account presented a session"
            );
        }
        _ => {
            security_event!(
                SecurityEvent::AccessDenied,
                path = %path,
                reason = %err.reason(),
                error = %err,
                token = %token,
                "Request rejected"
            );
        }
    }
}

// ============================================================================
// Signature
// ============================================================================

/// Verify the request signature on routes that require one.
pub async fn verify_signature(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    if !state.config.check_sign || !state.policy.rule(&path).signed {
        return Ok(next.run(request).await);
    }

    let app_id = header_value(request.headers(), &state.headers.app_id)
        .ok_or(AuthError::MissingArgument(HEADER_APP_ID))?;
    let app_key = match state.app_keys.get(&app_id) {
        Some(key) => key,
        None => {
            security_event!(
                SecurityEvent::SignatureRejected,
                app_id = %app_id,
                path = %path,
                "Unknown application"
            );
            return Err(AuthError::UnknownApp.into());
        }
    };
    let provided = match header_value(request.headers(), &state.headers.sign) {
        Some(sign) => sign,
        None => {
            security_event!(
                SecurityEvent::SignatureRejected,
                app_id = %app_id,
                path = %path,
                "Missing signature"
            );
            return Err(AuthError::Integrity.into());
        }
    };

    #[cfg(feature = "debug-sign-bypass")]
    if state.config.debug_sign_bypass_enabled() && constant_time_str_eq(&provided, &state.config.debug_sign_key) {
        tracing::warn!(app_id = %app_id, path = %path, "Debug sign key accepted");
        let mut request = request;
        request.extensions_mut().insert(AppId(app_id));
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.config.max_request_size)
        .await
        .map_err(|e| {
            ApiError::with_msg(Reason::ArgsInvalid, "request body unreadable")
                .with_details(e.to_string())
                .with_status(axum::http::StatusCode::UNAUTHORIZED)
        })?;

    let signed = signed_request(&parts, &body);
    if let Err(err) = state.signer.verify(&signed, app_key, &provided) {
        tracing::warn!(
            app_id = %app_id,
            method = %signed.method,
            path = %path,
            string_to_sign = %err.string_to_sign,
            "Signature mismatch"
        );
        security_event!(
            SecurityEvent::SignatureRejected,
            app_id = %app_id,
            path = %path,
            "Request signature mismatch"
        );
        return Err(AuthError::Integrity.into());
    }

    let mut request = Request::from_parts(parts, Body::from(body));
    request.extensions_mut().insert(AppId(app_id));
    Ok(next.run(request).await)
}

/// Gather the signed parts of an HTTP request.
///
/// Form-encoded bodies of POST, PUT and PATCH requests contribute their
/// fields to the query parameters.
pub fn signed_request(parts: &Parts, body: &[u8]) -> SignedRequest {
    let mut query = MultiMap::new();
    if let Some(q) = parts.uri.query() {
        collect_form(&mut query, q.as_bytes());
    }

    let has_form_body = matches!(parts.method, Method::POST | Method::PUT | Method::PATCH)
        && parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if has_form_body {
        collect_form(&mut query, body);
    }

    let mut headers = MultiMap::new();
    for (name, value) in &parts.headers {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    SignedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query,
        headers,
        body: body.to_vec(),
    }
}

fn collect_form(into: &mut MultiMap, input: &[u8]) {
    for (key, value) in url::form_urlencoded::parse(input) {
        into.entry(key.into_owned()).or_default().push(value.into_owned());
    }
}

// ============================================================================
// Tests
// ============================================================================
