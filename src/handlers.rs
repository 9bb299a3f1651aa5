//! Account HTTP API
//!
//! | Route | Method | Trust | Signed |
//! |---|---|---|---|
//! | `/v1/account/ping` | GET | None | no |
//! | `/v1/account/sms/check` | POST | None | no |
//! | `/v1/account/user/sms/send` | POST | None | yes |
//! | `/v1/account/user/sms/login` | POST | None | yes |
//! | `/v1/account/user/logout` | POST | User | no |
//! | `/v1/account/user/userinfo` | GET | User | yes |
//! | `/v1/man/account/user/set_status` | POST | Admin | no |
//!
//! The trust table is the single source for both the router and the
//! [`RouteTrustPolicy`] the middleware consults.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::account::{AccountService, LoginResult};
use crate::clock::Clock;
use crate::config::{AuthConfig, ConfigError};
use crate::error::{ApiError, ApiResponse, Reason, Result};
use crate::layers::AccountRouter;
use crate::middleware::{AuthState, Identity};
use crate::policy::{RouteTrustPolicy, TrustLevel};
use crate::session::SessionStore;
use crate::sms::{SmsCodeStore, BIZ_LOGIN};
use crate::store::{CacheBackend, TimedStore};
use crate::users::{ClientMeta, UserDirectory, UserStatus};

pub const PING: &str = "/v1/account/ping";
pub const SMS_CHECK: &str = "/v1/account/sms/check";
pub const SMS_SEND: &str = "/v1/account/user/sms/send";
pub const SMS_LOGIN: &str = "/v1/account/user/sms/login";
pub const LOGOUT: &str = "/v1/account/user/logout";
pub const USER_INFO: &str = "/v1/account/user/userinfo";
pub const SET_STATUS: &str = "/v1/man/account/user/set_status";

/// Path, trust level and signing requirement of every route.
pub const ROUTES: &[(&str, TrustLevel, bool)] = &[
    (PING, TrustLevel::None, false),
    (SMS_CHECK, TrustLevel::None, false),
    (SMS_SEND, TrustLevel::None, true),
    (SMS_LOGIN, TrustLevel::None, true),
    (LOGOUT, TrustLevel::User, false),
    (USER_INFO, TrustLevel::User, true),
    (SET_STATUS, TrustLevel::Admin, false),
];

/// Trust policy for [`ROUTES`].
pub fn trust_policy() -> RouteTrustPolicy {
    ROUTES
        .iter()
        .fold(RouteTrustPolicy::builder(), |b, (path, trust, signed)| {
            b.route(*path, *trust, *signed)
        })
        .build()
}

// ============================================================================
// State
// ============================================================================

/// Router state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: AuthState,
    pub accounts: AccountService,
}

impl AppState {
    /// Wire the service together from its collaborators.
    pub fn new(
        config: Arc<AuthConfig>,
        cache: Arc<dyn CacheBackend>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        let store = TimedStore::new(cache, config.store_timeout);

        let mut codes = SmsCodeStore::new(store.clone(), config.sms_code_lifetime)
            .with_test_accounts(config.test_accounts.clone());
        if config.debug {
            codes = codes.with_super_code(config.super_code.clone());
        }

        let auth = AuthState::new(config, SessionStore::new(store), users, trust_policy(), clock)?;
        let accounts = AccountService::new(&auth, codes);
        Ok(Self { auth, accounts })
    }
}

/// The account API with authentication and the request layer stack applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PING, get(ping))
        .route(SMS_CHECK, post(check_code))
        .route(SMS_SEND, post(send_code))
        .route(SMS_LOGIN, post(sms_login))
        .route(LOGOUT, post(logout))
        .route(USER_INFO, get(user_info))
        .route(SET_STATUS, post(set_status))
        .with_account_security(state.auth.clone())
        .with_state(state)
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCodeRequest {
    #[serde(default)]
    pub tel: String,
    #[serde(default)]
    pub biz_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCodeRequest {
    #[serde(default)]
    pub tel: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub biz_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsLoginRequest {
    #[serde(default)]
    pub tel: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub user_type: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub id: i64,
    pub status: i16,
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> std::result::Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::with_msg(Reason::ArgsInvalid, "invalid request body").with_details(e.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

async fn ping(State(state): State<AppState>) -> Result<Value> {
    Ok(ApiResponse(json!({ "now": state.auth.clock.now() })))
}

async fn send_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendCodeRequest>, JsonRejection>,
) -> Result<Value> {
    let req = json_body(payload)?;
    let biz_type = req.biz_type.as_deref().unwrap_or(BIZ_LOGIN);
    state.accounts.send_code(biz_type, &req.tel).await?;
    Ok(ApiResponse(json!({})))
}

async fn check_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckCodeRequest>, JsonRejection>,
) -> Result<Value> {
    let req = json_body(payload)?;
    let biz_type = req.biz_type.as_deref().unwrap_or(BIZ_LOGIN);
    state.accounts.check_code(biz_type, &req.tel, &req.code).await?;
    Ok(ApiResponse(json!({})))
}

async fn sms_login(
    State(state): State<AppState>,
    meta: ClientMeta,
    payload: std::result::Result<Json<SmsLoginRequest>, JsonRejection>,
) -> Result<LoginResult> {
    let req = json_body(payload)?;
    let login = state
        .accounts
        .login_with_sms(&req.tel, &req.code, req.user_type, &meta)
        .await?;
    Ok(ApiResponse(login))
}

async fn logout(State(state): State<AppState>, identity: Identity) -> Result<Value> {
    state.accounts.logout(&identity).await?;
    Ok(ApiResponse(json!({})))
}

async fn user_info(State(state): State<AppState>, identity: Identity) -> Result<Value> {
    let user = state.accounts.user_info(identity.user_id).await?;
    Ok(ApiResponse(json!({ "userInfo": user })))
}

async fn set_status(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SetStatusRequest>, JsonRejection>,
) -> Result<Value> {
    let req = json_body(payload)?;
    let status = UserStatus::try_from(req.status).map_err(|e| ApiError::with_msg(Reason::ArgsInvalid, e))?;
    state.accounts.set_status(req.id, status).await?;
    Ok(ApiResponse(json!({})))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::signing::SignedRequest;
    use crate::store::MemoryCache;
    use crate::users::MemoryUserDirectory;
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Method, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const NOW: i64 = 1_700_000_000;
    const TEL: &str = "13800000000";
    const APP_ID: &str = "ios";
    const APP_KEY: &str = "ios-secret";
    const ADMIN: &str = "admin-secret";
    const TTL_SECS: u64 = 3600;

    struct TestApp {
        state: AppState,
        cache: Arc<MemoryCache>,
        clock: Arc<ManualClock>,
    }

    fn test_app() -> TestApp {
        let config = AuthConfig::builder()
            .app_key(APP_ID, APP_KEY)
            .admin_token(ADMIN)
            .token_lifetime(Duration::from_secs(TTL_SECS))
            .build()
            .unwrap();
        let cache = Arc::new(MemoryCache::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let state = AppState::new(
            Arc::new(config),
            cache.clone(),
            Arc::new(MemoryUserDirectory::new()),
            clock.clone(),
        )
        .unwrap();
        TestApp { state, cache, clock }
    }

    /// A request under construction, signed on `build` when asked.
    struct Call {
        method: Method,
        path: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Call {
        fn new(method: Method, path: &str) -> Self {
            Self {
                method,
                path: path.to_string(),
                headers: vec![("X-OA-AppID".into(), APP_ID.into())],
                body: Vec::new(),
            }
        }

        fn header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.into(), value.into()));
            self
        }

        fn json(mut self, body: Value) -> Self {
            self.body = serde_json::to_vec(&body).unwrap();
            self.headers.push((CONTENT_TYPE.to_string(), "application/json".into()));
            self
        }

        fn signature(&self, app: &TestApp) -> String {
            let mut signed = SignedRequest::new(self.method.as_str(), self.path.as_str()).body(self.body.clone());
            for (name, value) in &self.headers {
                signed = signed.header(name.as_str(), value.as_str());
            }
            app.state.auth.signer.sign(&signed, APP_KEY).signature
        }

        fn signed(self, app: &TestApp) -> Self {
            let sig = self.signature(app);
            self.header("X-OA-Sign", &sig)
        }

        fn build(self) -> Request<Body> {
            let mut builder = Request::builder().method(self.method).uri(self.path);
            for (name, value) in self.headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(self.body)).unwrap()
        }
    }

    impl TestApp {
        async fn send(&self, call: Call) -> Response {
            router(self.state.clone()).oneshot(call.build()).await.unwrap()
        }

        async fn login(&self) -> (i64, String) {
            let call = Call::new(Method::POST, SMS_SEND).json(json!({ "tel": TEL })).signed(self);
            assert_eq!(self.send(call).await.status(), StatusCode::OK);

            let code = self
                .cache
                .get(&format!("cd:{}:{}", BIZ_LOGIN, TEL))
                .await
                .unwrap()
                .unwrap();

            let call = Call::new(Method::POST, SMS_LOGIN)
                .header("X-OA-Platform", "ios")
                .header("X-OA-Version", "3.0.0")
                .json(json!({ "tel": TEL, "code": code }))
                .signed(self);
            let response = self.send(call).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["ok"], true);
            let token = body["data"]["token"].as_str().unwrap().to_string();
            let user_id = body["data"]["userInfo"]["id"].as_i64().unwrap();
            (user_id, token)
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn user_info_call(token: &str) -> Call {
        Call::new(Method::GET, USER_INFO).header("X-OA-Token", token)
    }

    #[test]
    fn test_trust_policy_covers_routes() {
        let policy = trust_policy();
        assert_eq!(policy.len(), ROUTES.len());
        assert_eq!(policy.rule(USER_INFO).trust, TrustLevel::User);
        assert!(policy.rule(USER_INFO).signed);
        assert_eq!(policy.rule(SET_STATUS).trust, TrustLevel::Admin);
        assert!(!policy.rule(PING).signed);
    }

    #[tokio::test]
    async fn test_ping() {
        let app = test_app();
        let response = app.send(Call::new(Method::GET, PING)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "ok": true, "reason": "", "data": { "now": NOW } })
        );
    }

    #[tokio::test]
    async fn test_login_then_user_route_within_ttl() {
        let app = test_app();
        let (user_id, token) = app.login().await;

        app.clock.advance(TTL_SECS as i64 - 1);
        let call = user_info_call(&token).signed(&app);
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["userInfo"]["id"], user_id);
        assert_eq!(body["data"]["userInfo"]["tel"], TEL);
        assert_eq!(body["data"]["userInfo"]["platform"], "ios");
        assert_eq!(body["data"]["userInfo"]["version"], "3.0.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_after_ttl_is_expired() {
        let app = test_app();
        let (_, token) = app.login().await;

        app.clock.advance(TTL_SECS as i64 + 1);
        tokio::time::advance(Duration::from_secs(TTL_SECS + 1)).await;

        let call = user_info_call(&token).signed(&app);
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({ "ok": false, "reason": "ERR_TOKEN_EXPIRED" })
        );
    }

    #[tokio::test]
    async fn test_signature_covers_only_signed_headers() {
        let app = test_app();
        let (_, token) = app.login().await;

        let call = user_info_call(&token)
            .header("User-Agent", "client/1.0")
            .header("X-OA-Platform", "ios");
        let sig = call.signature(&app);

        // Unsigned header changed after signing.
        let tampered = user_info_call(&token)
            .header("User-Agent", "client/2.0")
            .header("X-OA-Platform", "ios")
            .header("X-OA-Sign", &sig);
        let response = app.send(tampered).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Signed header changed after signing.
        let tampered = user_info_call(&token)
            .header("User-Agent", "client/1.0")
            .header("X-OA-Platform", "android")
            .header("X-OA-Sign", &sig);
        let response = app.send(tampered).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["reason"], "ERR_SIGN_ERROR");
    }

    #[tokio::test]
    async fn test_disabled_user_is_locked_out() {
        let app = test_app();
        let (user_id, token) = app.login().await;

        let call = Call::new(Method::POST, SET_STATUS)
            .header("X-OA-Token", ADMIN)
            .json(json!({ "id": user_id, "status": -1 }));
        let response = app.send(call).await;
        assert_eq!(body_json(response).await["ok"], true);

        let response = app.send(user_info_call(&token).signed(&app)).await;
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["reason"], "ERR_USER_IS_LOCKED");

        let response = app
            .send(Call::new(Method::POST, LOGOUT).header("X-OA-Token", &token))
            .await;
        assert_eq!(body_json(response).await["reason"], "ERR_USER_IS_LOCKED");
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let app = test_app();
        let (_, token) = app.login().await;

        let response = app
            .send(Call::new(Method::POST, LOGOUT).header("X-OA-Token", &token))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.send(user_info_call(&token).signed(&app)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["reason"], "ERR_TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_login_with_wrong_code() {
        let app = test_app();
        let call = Call::new(Method::POST, SMS_LOGIN)
            .json(json!({ "tel": TEL, "code": "nope" }))
            .signed(&app);
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["reason"], "ERR_CODE_INVALID");
    }

    #[tokio::test]
    async fn test_check_code() {
        let app = test_app();
        let call = Call::new(Method::POST, SMS_SEND).json(json!({ "tel": TEL })).signed(&app);
        app.send(call).await;
        let code = app
            .cache
            .get(&format!("cd:{}:{}", BIZ_LOGIN, TEL))
            .await
            .unwrap()
            .unwrap();

        let call = Call::new(Method::POST, SMS_CHECK).json(json!({ "tel": TEL, "code": code }));
        assert_eq!(body_json(app.send(call).await).await["ok"], true);

        let call = Call::new(Method::POST, SMS_CHECK)
            .json(json!({ "tel": TEL, "code": code, "bizType": "resetPwd" }));
        assert_eq!(body_json(app.send(call).await).await["reason"], "ERR_CODE_INVALID");
    }

    #[tokio::test]
    async fn test_unsigned_login_rejected() {
        let app = test_app();
        let call = Call::new(Method::POST, SMS_LOGIN).json(json!({ "tel": TEL, "code": "12345" }));
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["reason"], "ERR_SIGN_ERROR");
    }

    #[tokio::test]
    async fn test_admin_route_rejects_wrong_secret() {
        let app = test_app();
        let call = Call::new(Method::POST, SET_STATUS)
            .header("X-OA-Token", "guess")
            .json(json!({ "id": 1, "status": -1 }));
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["reason"], "ERR_TOKEN_INVALID");
    }

    #[tokio::test]
    async fn test_set_status_validates_body() {
        let app = test_app();
        let call = Call::new(Method::POST, SET_STATUS)
            .header("X-OA-Token", ADMIN)
            .json(json!({ "id": 1, "status": 7 }));
        let response = app.send(call).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let call = Call::new(Method::POST, SET_STATUS)
            .header("X-OA-Token", ADMIN)
            .json(json!({ "id": 99, "status": 1 }));
        let response = app.send(call).await;
        assert_eq!(body_json(response).await["reason"], "ERR_OBJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_test_account_login() {
        let config = AuthConfig::builder()
            .app_key(APP_ID, APP_KEY)
            .test_account("13900000000", "24680")
            .build()
            .unwrap();
        let cache = Arc::new(MemoryCache::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let state = AppState::new(
            Arc::new(config),
            cache.clone(),
            Arc::new(MemoryUserDirectory::new()),
            clock.clone(),
        )
        .unwrap();
        let app = TestApp { state, cache, clock };

        // The fixed code only opens the login route.
        let call = Call::new(Method::POST, SMS_CHECK).json(json!({ "tel": "13900000000", "code": "24680" }));
        let body = body_json(app.send(call).await).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["reason"], "ERR_CODE_INVALID");

        let call = Call::new(Method::POST, SMS_LOGIN)
            .json(json!({ "tel": "13900000000", "code": "24680" }))
            .signed(&app);
        let response = app.send(call).await;
        assert_eq!(body_json(response).await["ok"], true);
    }
}
