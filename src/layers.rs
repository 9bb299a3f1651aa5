//! Layer stack for the account router
//!
//! Provides the `AccountRouter` trait that wraps a router with the
//! authentication middleware and the request limits.

use axum::http::StatusCode;
use axum::middleware;
use axum::Router;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::middleware::{authorize, verify_signature, AuthState};

/// Extension trait for applying the account service layers to an Axum Router.
///
/// # Example
///
/// ```ignore
/// use account_guard::{layers::AccountRouter, middleware::AuthState};
///
/// let app = Router::new()
///     .route("/v1/account/user/userinfo", get(user_info))
///     .with_account_security(auth_state)
///     .with_state(app_state);
/// ```
pub trait AccountRouter {
    /// Apply all layers using the limits in `state.config`.
    ///
    /// Request order, outermost first:
    /// 1. Timeout
    /// 2. Request body limit
    /// 3. Signature verification
    /// 4. Trust level enforcement (innermost)
    ///
    /// Request tracing is left to the caller so it can wrap everything else.
    fn with_account_security(self, state: AuthState) -> Self;
}

impl<S> AccountRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_account_security(self, state: AuthState) -> Self {
        let timeout = state.config.request_timeout;
        let max_request_size = state.config.max_request_size;

        self.layer(middleware::from_fn_with_state(state.clone(), authorize))
            .layer(middleware::from_fn_with_state(state, verify_signature))
            .layer(RequestBodyLimitLayer::new(max_request_size))
            // Covers the session store round trips made by the middleware.
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AuthConfig;
    use crate::handlers::{router, AppState, PING, SMS_SEND};
    use crate::store::MemoryCache;
    use crate::users::MemoryUserDirectory;
    use axum::body::Body;
    use axum::http::{header::CONTENT_LENGTH, Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(max_request_size: usize) -> Router {
        let config = AuthConfig::builder()
            .app_key("ios", "ios-secret")
            .max_request_size(max_request_size)
            .build()
            .unwrap();
        let state = AppState::new(
            Arc::new(config),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        router(state)
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let body = vec![b'x'; 64];
        let request = Request::builder()
            .method(Method::POST)
            .uri(SMS_SEND)
            .header("X-OA-AppID", "ios")
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        let response = app(16).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_small_request_passes() {
        let request = Request::builder().uri(PING).body(Body::empty()).unwrap();
        let response = app(16).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
