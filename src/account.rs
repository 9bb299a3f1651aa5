//! Account service
//!
//! Login by SMS code, session issuance, logout, profile lookup and the admin
//! status switch. Handlers in [`crate::handlers`] are thin wrappers over
//! these methods.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::{ApiError, Reason};
use crate::middleware::{AuthState, Identity};
use crate::observability::{security_event, SecurityEvent};
use crate::session::{token_prefix, SessionStore};
use crate::sms::SmsCodeStore;
use crate::token::{TokenCodec, TokenTag};
use crate::users::{ClientMeta, LoginRecord, NewUser, UserDirectory, UserRecord, UserStatus, USER_TYPE_NORMAL};

/// A freshly issued session.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub token: String,
    #[serde(rename = "userInfo")]
    pub user: UserRecord,
}

/// Account operations backed by the session store and user directory.
#[derive(Clone)]
pub struct AccountService {
    codec: TokenCodec,
    sessions: SessionStore,
    codes: SmsCodeStore,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    token_lifetime: std::time::Duration,
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService")
            .field("token_lifetime", &self.token_lifetime)
            .finish_non_exhaustive()
    }
}

impl AccountService {
    /// Share the codec, sessions and directory the middleware uses.
    pub fn new(auth: &AuthState, codes: SmsCodeStore) -> Self {
        Self {
            codec: auth.codec.clone(),
            sessions: auth.sessions.clone(),
            codes,
            users: auth.users.clone(),
            clock: auth.clock.clone(),
            token_lifetime: auth.config.token_lifetime,
        }
    }

    /// Issue a verification code for `tel`.
    pub async fn send_code(&self, biz_type: &str, tel: &str) -> Result<(), ApiError> {
        require("tel", tel)?;
        require("bizType", biz_type)?;
        self.codes.send_code(biz_type, tel).await?;
        Ok(())
    }

    /// Check a code without logging in. Used by other back-office services.
    /// Test accounts and the super code are not accepted here.
    pub async fn check_code(&self, biz_type: &str, tel: &str, code: &str) -> Result<(), ApiError> {
        require("tel", tel)?;
        require("code", code)?;
        self.codes.check_code(biz_type, tel, code).await?;
        Ok(())
    }

    /// Verify an SMS code, find or register the user, and open a session.
    ///
    /// A missing or zero `user_type` means [`USER_TYPE_NORMAL`]. Returning
    /// users get their client details refreshed from `meta`, and every
    /// successful login is appended to the login log.
    pub async fn login_with_sms(
        &self,
        tel: &str,
        code: &str,
        user_type: Option<i16>,
        meta: &ClientMeta,
    ) -> Result<LoginResult, ApiError> {
        require("tel", tel)?;
        require("code", code)?;
        let user_type = user_type.filter(|t| *t != 0).unwrap_or(USER_TYPE_NORMAL);

        if let Err(err) = self.codes.check_login_code(tel, code).await {
            security_event!(
                SecurityEvent::AuthenticationFailure,
                tel = %tel,
                error = %err,
                "SMS login rejected"
            );
            return Err(err.into());
        }

        let now = self.clock.now();
        let user = match self.users.get_by_tel(tel, user_type).await? {
            Some(user) => self.refresh_meta(user, meta, now).await?,
            None => {
                let (user, created) = self
                    .users
                    .create(NewUser {
                        tel: tel.to_string(),
                        user_type,
                        meta: meta.clone(),
                        now,
                    })
                    .await?;
                if created {
                    security_event!(
                        SecurityEvent::UserRegistered,
                        user_id = user.id,
                        user_type = user_type,
                        platform = %meta.platform,
                        "User registered on first login"
                    );
                    user
                } else {
                    self.refresh_meta(user, meta, now).await?
                }
            }
        };

        let result = self.issue_session(user, &meta.platform).await?;
        self.record_login(result.user.id, meta, now).await;
        security_event!(
            SecurityEvent::AuthenticationSuccess,
            user_id = result.user.id,
            platform = %meta.platform,
            "User logged in"
        );
        Ok(result)
    }

    async fn refresh_meta(&self, user: UserRecord, meta: &ClientMeta, now: i64) -> Result<UserRecord, ApiError> {
        // Removed between lookup and update: keep the record we have.
        Ok(self
            .users
            .update_meta(user.id, meta.clone(), now)
            .await?
            .unwrap_or(user))
    }

    /// A failed log write does not fail the login.
    async fn record_login(&self, user_id: i64, meta: &ClientMeta, now: i64) {
        let record = LoginRecord {
            user_id,
            meta: meta.clone(),
            create_time: now,
        };
        if let Err(e) = self.users.record_login(record).await {
            tracing::warn!(user_id, error = %e, "Failed to record login");
        }
    }

    /// Mint a token for an already verified user and record it as live.
    pub async fn issue_session(&self, user: UserRecord, platform: &str) -> Result<LoginResult, ApiError> {
        if user.is_disabled() {
            security_event!(
                SecurityEvent::AccountLocked,
                user_id = user.id,
                "Login attempt on disabled account"
            );
            return Err(ApiError::with_msg(Reason::UserIsLocked, "account is locked"));
        }

        let lifetime = i64::try_from(self.token_lifetime.as_secs()).unwrap_or(i64::MAX);
        let expire_time = self.clock.now().saturating_add(lifetime);
        let token = self
            .codec
            .encrypt(TokenTag::Registered, user.user_type, user.id, expire_time);
        self.sessions
            .save(&token, user.id, user.user_type, platform, self.token_lifetime)
            .await?;

        Ok(LoginResult { token, user })
    }

    /// End the caller's current session.
    pub async fn logout(&self, identity: &Identity) -> Result<(), ApiError> {
        self.sessions.revoke(identity.user_id, &identity.token).await?;
        security_event!(
            SecurityEvent::Logout,
            user_id = identity.user_id,
            token = %token_prefix(&identity.token),
            "User logged out"
        );
        Ok(())
    }

    /// Current record for a user.
    pub async fn user_info(&self, user_id: i64) -> Result<UserRecord, ApiError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::with_msg(Reason::ObjectNotFound, "user not found"))
    }

    /// Enable or disable an account. Live sessions of a disabled user are
    /// refused by the middleware from the next request on.
    pub async fn set_status(&self, user_id: i64, status: UserStatus) -> Result<(), ApiError> {
        if !self.users.set_status(user_id, status, self.clock.now()).await? {
            return Err(ApiError::with_msg(Reason::ObjectNotFound, "user not found"));
        }
        security_event!(
            SecurityEvent::AccountStatusChanged,
            user_id = user_id,
            status = status.code(),
            "Account status changed"
        );
        Ok(())
    }
}

fn require(name: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::with_msg(Reason::ArgsMissing, format!("{} is required", name)));
    }
    Ok(())
}
