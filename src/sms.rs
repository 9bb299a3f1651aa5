//! SMS verification codes
//!
//! Codes are stored as `cd:<bizType>:<tel> -> code` with the configured SMS
//! lifetime. Delivery to the handset is outside this crate: sending a code
//! generates it, stores it and logs that it was issued.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::crypto::constant_time_str_eq;
use crate::store::{StoreError, TimedStore};

/// Business type used by the login flow.
pub const BIZ_LOGIN: &str = "login";

/// Number of digits in a generated code.
pub const CODE_LENGTH: usize = 5;

/// Why a submitted code was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("verification code invalid")]
    Invalid,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verification code store.
#[derive(Debug, Clone)]
pub struct SmsCodeStore {
    store: TimedStore,
    ttl: Duration,
    test_accounts: HashMap<String, String>,
    super_code: Option<String>,
}

impl SmsCodeStore {
    pub fn new(store: TimedStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            test_accounts: HashMap::new(),
            super_code: None,
        }
    }

    /// Phone numbers that always accept a fixed code and never hit the store.
    pub fn with_test_accounts(mut self, accounts: HashMap<String, String>) -> Self {
        self.test_accounts = accounts;
        self
    }

    /// A code accepted for every number. Only pass one in debug mode.
    pub fn with_super_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.super_code = (!code.is_empty()).then_some(code);
        self
    }

    fn key(biz_type: &str, tel: &str) -> String {
        format!("cd:{}:{}", biz_type, tel)
    }

    /// Generate a numeric code.
    pub fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    /// Generate, store and "send" a code. Returns the code.
    pub async fn send_code(&self, biz_type: &str, tel: &str) -> Result<String, StoreError> {
        let code = Self::generate_code();
        self.store
            .set(&Self::key(biz_type, tel), code.clone(), self.ttl)
            .await?;
        tracing::info!(biz_type = %biz_type, tel = %tel, "Verification code issued");
        Ok(code)
    }

    /// Check a submitted code against the one stored for `biz_type` and `tel`.
    pub async fn check_code(&self, biz_type: &str, tel: &str, code: &str) -> Result<(), CodeError> {
        match self.store.get(&Self::key(biz_type, tel)).await? {
            Some(stored) if !code.is_empty() && stored == code => Ok(()),
            Some(_) => {
                tracing::warn!(biz_type = %biz_type, tel = %tel, "Verification code mismatch");
                Err(CodeError::Invalid)
            }
            None => {
                tracing::warn!(biz_type = %biz_type, tel = %tel, "Verification code not found");
                Err(CodeError::Invalid)
            }
        }
    }

    /// Check a login code. Test accounts and the super code are accepted
    /// here and nowhere else.
    pub async fn check_login_code(&self, tel: &str, code: &str) -> Result<(), CodeError> {
        if self.test_accounts.get(tel).is_some_and(|c| c == code) {
            tracing::info!(tel = %tel, "Test account code accepted");
            return Ok(());
        }
        if self
            .super_code
            .as_deref()
            .is_some_and(|sc| constant_time_str_eq(sc, code))
        {
            tracing::info!(tel = %tel, "Debug super code accepted");
            return Ok(());
        }
        self.check_code(BIZ_LOGIN, tel, code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::BrokenCache;
    use crate::store::{CacheBackend, MemoryCache};
    use std::sync::Arc;

    fn codes(backend: impl CacheBackend + 'static) -> SmsCodeStore {
        SmsCodeStore::new(
            TimedStore::new(Arc::new(backend), Duration::from_millis(50)),
            Duration::from_secs(180),
        )
    }

    #[test]
    fn test_generate_code_shape() {
        let code = SmsCodeStore::generate_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_send_then_check() {
        let store = codes(MemoryCache::new());
        let code = store.send_code(BIZ_LOGIN, "13800000000").await.unwrap();
        assert_eq!(store.check_code(BIZ_LOGIN, "13800000000", &code).await, Ok(()));
    }

    #[tokio::test]
    async fn test_wrong_code_and_wrong_biz_rejected() {
        let store = codes(MemoryCache::new());
        let code = store.send_code(BIZ_LOGIN, "13800000000").await.unwrap();
        let wrong = if code == "00000" { "11111" } else { "00000" };
        assert_eq!(
            store.check_code(BIZ_LOGIN, "13800000000", wrong).await,
            Err(CodeError::Invalid)
        );
        assert_eq!(
            store.check_code("resetPwd", "13800000000", &code).await,
            Err(CodeError::Invalid)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires() {
        let store = codes(MemoryCache::new());
        let code = store.send_code(BIZ_LOGIN, "13800000000").await.unwrap();
        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(
            store.check_code(BIZ_LOGIN, "13800000000", &code).await,
            Err(CodeError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_test_account_bypasses_store_on_login_only() {
        let accounts = HashMap::from([("13900000000".to_string(), "12345".to_string())]);
        let store = codes(BrokenCache).with_test_accounts(accounts);
        assert_eq!(store.check_login_code("13900000000", "12345").await, Ok(()));
        assert!(matches!(
            store.check_login_code("13900000000", "54321").await,
            Err(CodeError::Store(_))
        ));
        assert!(matches!(
            store.check_code(BIZ_LOGIN, "13900000000", "12345").await,
            Err(CodeError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_super_code_on_login_only() {
        let store = codes(MemoryCache::new()).with_super_code("99999");
        assert_eq!(store.check_login_code("13700000000", "99999").await, Ok(()));
        assert_eq!(
            store.check_code(BIZ_LOGIN, "13700000000", "99999").await,
            Err(CodeError::Invalid)
        );

        let store = codes(MemoryCache::new()).with_super_code("");
        assert_eq!(
            store.check_login_code("13700000000", "").await,
            Err(CodeError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_login_code_falls_back_to_stored_code() {
        let store = codes(MemoryCache::new()).with_super_code("99999");
        let code = store.send_code(BIZ_LOGIN, "13800000000").await.unwrap();
        assert_eq!(store.check_login_code("13800000000", &code).await, Ok(()));
    }
}
