//! Account service configuration
//!
//! [`AuthConfig`] is built once at startup and then shared read-only
//! (`Arc<AuthConfig>`) by every component. There is no global mutable state:
//! the cipher key, the signed-header allow-list, the admin secret and the
//! application keys all live here.
//!
//! # Example
//!
//! ```ignore
//! use account_guard::AuthConfig;
//!
//! // Load from environment variables
//! let config = AuthConfig::from_env()?;
//!
//! // Or from a TOML file
//! let config = AuthConfig::from_toml_file("account.toml")?;
//!
//! // Or build programmatically
//! let config = AuthConfig::builder()
//!     .app_key("ios", "a2f0d6e1...")
//!     .admin_token("2c1d...")
//!     .token_lifetime(Duration::from_secs(7 * 24 * 3600))
//!     .build()?;
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::checksum::{ChecksumCodec, DigestEncoding};
use crate::parse::{parse_duration, parse_flag};
use crate::token::TokenCodec;

/// Default token cipher key (AES-256). Override in every deployment.
pub const DEFAULT_TOKEN_KEY: &str = "cde6ca958b95b08db5f53c8f583dcb62";
/// Default token cipher IV; only the first 16 bytes are used.
pub const DEFAULT_TOKEN_IV: &str = "6760ca184fcee8c3194bf377d213d900";
/// Default checksum magic.
pub const DEFAULT_CHECKSUM_MAGIC: &str = "1654fb0cf72bdcaf";

/// Suffix for the session token header.
pub const HEADER_TOKEN: &str = "Token";
/// Suffix for the calling application header.
pub const HEADER_APP_ID: &str = "AppID";
/// Suffix for the request signature header.
pub const HEADER_SIGN: &str = "Sign";
/// Suffix for the client platform header.
pub const HEADER_PLATFORM: &str = "Platform";
/// Suffix for the client version header.
pub const HEADER_VERSION: &str = "Version";
/// Suffix for the distribution channel header.
pub const HEADER_CHANNEL: &str = "Channel";
/// Suffix for the device identifier header.
pub const HEADER_DEVICE_ID: &str = "DeviceID";

/// Configuration errors. Any of these stops the process at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("token cipher key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("token cipher IV must be at least 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(key: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

// ============================================================================
// AuthConfig
// ============================================================================

/// Immutable account service configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Token cipher key, 16/24/32 bytes
    pub token_key: Vec<u8>,
    /// Token cipher IV, at least 16 bytes
    pub token_iv: Vec<u8>,
    pub checksum_magic: String,
    pub checksum_length: usize,
    pub checksum_encoding: DigestEncoding,

    /// How long an issued session stays valid
    pub token_lifetime: Duration,
    /// How long an SMS verification code stays valid
    pub sms_code_lifetime: Duration,
    /// Upper bound on a single session-store round trip
    pub store_timeout: Duration,

    /// Prefix for every custom header (`X-OA-Token`, `X-OA-Sign`, ...)
    pub header_prefix: String,
    /// Standard headers covered by request signatures, lower-case
    pub signed_headers: BTreeSet<String>,
    /// Application ID to signing secret
    pub app_keys: HashMap<String, String>,
    /// Verify signatures on routes that require them
    pub check_sign: bool,

    /// Secret expected in the token header on admin routes
    pub admin_token: String,

    /// Non-production mode
    pub debug: bool,
    /// Signature accepted in place of a real one when debugging.
    /// Only honoured in builds with the `debug-sign-bypass` feature.
    pub debug_sign_key: String,
    /// Verification code accepted for any phone number when debugging
    pub super_code: String,
    /// Phone numbers with a fixed verification code
    pub test_accounts: HashMap<String, String>,

    pub listen_addr: String,
    pub max_request_size: usize,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_key", &"[REDACTED]")
            .field("checksum_length", &self.checksum_length)
            .field("checksum_encoding", &self.checksum_encoding)
            .field("token_lifetime", &self.token_lifetime)
            .field("sms_code_lifetime", &self.sms_code_lifetime)
            .field("store_timeout", &self.store_timeout)
            .field("header_prefix", &self.header_prefix)
            .field("signed_headers", &self.signed_headers)
            .field("app_ids", &self.app_keys.keys().collect::<Vec<_>>())
            .field("check_sign", &self.check_sign)
            .field("debug", &self.debug)
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_key: DEFAULT_TOKEN_KEY.as_bytes().to_vec(),
            token_iv: DEFAULT_TOKEN_IV.as_bytes().to_vec(),
            checksum_magic: DEFAULT_CHECKSUM_MAGIC.to_string(),
            checksum_length: 4,
            checksum_encoding: DigestEncoding::Base64,
            token_lifetime: Duration::from_secs(30 * 24 * 3600),
            sms_code_lifetime: Duration::from_secs(180),
            store_timeout: Duration::from_millis(50),
            header_prefix: "X-OA-".to_string(),
            signed_headers: ["host", "date"].into_iter().map(String::from).collect(),
            app_keys: HashMap::new(),
            check_sign: true,
            admin_token: String::new(),
            debug: false,
            debug_sign_key: String::new(),
            super_code: String::new(),
            test_accounts: HashMap::new(),
            listen_addr: "0.0.0.0:2021".to_string(),
            max_request_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl AuthConfig {
    /// Create a new builder for programmatic configuration.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ACCOUNT_TOKEN_KEY`, `ACCOUNT_TOKEN_IV`: cipher key material
    /// - `ACCOUNT_CHECKSUM_MAGIC`, `ACCOUNT_CHECKSUM_LENGTH`, `ACCOUNT_CHECKSUM_ENCODING` ("hex"/"base64")
    /// - `ACCOUNT_TOKEN_TTL`: e.g. "30d" (default: "30d")
    /// - `ACCOUNT_SMS_CODE_TTL`: e.g. "180s" (default: "180s")
    /// - `ACCOUNT_STORE_TIMEOUT`: e.g. "50ms" (default: "50ms")
    /// - `ACCOUNT_HEADER_PREFIX`: (default: "X-OA-")
    /// - `ACCOUNT_SIGNED_HEADERS`: comma-separated (default: "host,date")
    /// - `ACCOUNT_APP_KEYS`: comma-separated `appID:secret` pairs
    /// - `ACCOUNT_CHECK_SIGN`: "true"/"false" (default: "true")
    /// - `ACCOUNT_ADMIN_TOKEN`
    /// - `ACCOUNT_DEBUG`, `ACCOUNT_DEBUG_SIGN_KEY`, `ACCOUNT_SUPER_CODE`
    /// - `ACCOUNT_TEST_ACCOUNTS`: comma-separated `tel:code` pairs
    /// - `ACCOUNT_LISTEN`: (default: "0.0.0.0:2021")
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok();
        let mut b = Self::builder();

        if let Some(v) = var("ACCOUNT_TOKEN_KEY") {
            b = b.token_key(v);
        }
        if let Some(v) = var("ACCOUNT_TOKEN_IV") {
            b = b.token_iv(v);
        }
        if let Some(v) = var("ACCOUNT_CHECKSUM_MAGIC") {
            b = b.checksum_magic(v);
        }
        if let Some(v) = var("ACCOUNT_CHECKSUM_LENGTH") {
            let n = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("ACCOUNT_CHECKSUM_LENGTH", v.as_str()))?;
            b = b.checksum_length(n);
        }
        if let Some(v) = var("ACCOUNT_CHECKSUM_ENCODING") {
            b = b.checksum_encoding(DigestEncoding::parse(&v));
        }
        if let Some(v) = var("ACCOUNT_TOKEN_TTL") {
            b = b.token_lifetime(env_duration("ACCOUNT_TOKEN_TTL", &v)?);
        }
        if let Some(v) = var("ACCOUNT_SMS_CODE_TTL") {
            b = b.sms_code_lifetime(env_duration("ACCOUNT_SMS_CODE_TTL", &v)?);
        }
        if let Some(v) = var("ACCOUNT_STORE_TIMEOUT") {
            b = b.store_timeout(env_duration("ACCOUNT_STORE_TIMEOUT", &v)?);
        }
        if let Some(v) = var("ACCOUNT_HEADER_PREFIX") {
            b = b.header_prefix(v);
        }
        if let Some(v) = var("ACCOUNT_SIGNED_HEADERS") {
            b = b.signed_headers(split_list(&v));
        }
        if let Some(v) = var("ACCOUNT_APP_KEYS") {
            for (id, secret) in split_pairs("ACCOUNT_APP_KEYS", &v)? {
                b = b.app_key(id, secret);
            }
        }
        if let Some(v) = var("ACCOUNT_CHECK_SIGN") {
            b = b.check_sign(env_flag("ACCOUNT_CHECK_SIGN", &v)?);
        }
        if let Some(v) = var("ACCOUNT_ADMIN_TOKEN") {
            b = b.admin_token(v);
        }
        if let Some(v) = var("ACCOUNT_DEBUG") {
            b = b.debug(env_flag("ACCOUNT_DEBUG", &v)?);
        }
        if let Some(v) = var("ACCOUNT_DEBUG_SIGN_KEY") {
            b = b.debug_sign_key(v);
        }
        if let Some(v) = var("ACCOUNT_SUPER_CODE") {
            b = b.super_code(v);
        }
        if let Some(v) = var("ACCOUNT_TEST_ACCOUNTS") {
            for (tel, code) in split_pairs("ACCOUNT_TEST_ACCOUNTS", &v)? {
                b = b.test_account(tel, code);
            }
        }
        if let Some(v) = var("ACCOUNT_LISTEN") {
            b = b.listen_addr(v);
        }

        b.build()
    }

    /// Load configuration from a TOML file. Unset keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        file.into_builder()?.build()
    }

    /// Full name of a custom header, e.g. `header_name("Token")` is `X-OA-Token`.
    pub fn header_name(&self, suffix: &str) -> String {
        format!("{}{}", self.header_prefix, suffix)
    }

    /// Whether the debug signature may stand in for a real one.
    pub fn debug_sign_bypass_enabled(&self) -> bool {
        cfg!(feature = "debug-sign-bypass") && self.debug && !self.debug_sign_key.is_empty()
    }

    /// Build the token codec described by this configuration.
    pub fn token_codec(&self) -> Result<TokenCodec, ConfigError> {
        let checksum = ChecksumCodec::new(
            self.checksum_magic.clone(),
            self.checksum_length,
            self.checksum_encoding,
        );
        TokenCodec::new(&self.token_key, &self.token_iv, checksum)
    }
}

fn env_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::invalid(key, value))
}

fn env_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_flag(value).ok_or_else(|| ConfigError::invalid(key, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_pairs(key: &str, value: &str) -> Result<Vec<(String, String)>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|item| match item.split_once(':') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(ConfigError::invalid(key, item)),
        })
        .collect()
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for AuthConfig
#[derive(Debug, Clone, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the token cipher key.
    pub fn token_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.config.token_key = key.into();
        self
    }

    /// Set the token cipher IV.
    pub fn token_iv(mut self, iv: impl Into<Vec<u8>>) -> Self {
        self.config.token_iv = iv.into();
        self
    }

    pub fn checksum_magic(mut self, magic: impl Into<String>) -> Self {
        self.config.checksum_magic = magic.into();
        self
    }

    pub fn checksum_length(mut self, length: usize) -> Self {
        self.config.checksum_length = length;
        self
    }

    pub fn checksum_encoding(mut self, encoding: DigestEncoding) -> Self {
        self.config.checksum_encoding = encoding;
        self
    }

    /// Set how long issued sessions stay valid.
    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.token_lifetime = lifetime;
        self
    }

    pub fn sms_code_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.sms_code_lifetime = lifetime;
        self
    }

    /// Set the per-call session store timeout.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    pub fn header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.header_prefix = prefix.into();
        self
    }

    /// Replace the signed-header allow-list. An empty list keeps `host` and `date`.
    pub fn signed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: BTreeSet<String> = headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if !headers.is_empty() {
            self.config.signed_headers = headers;
        }
        self
    }

    /// Register an application and its signing secret.
    pub fn app_key(mut self, app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.app_keys.insert(app_id.into(), secret.into());
        self
    }

    pub fn check_sign(mut self, enabled: bool) -> Self {
        self.config.check_sign = enabled;
        self
    }

    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.config.admin_token = token.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn debug_sign_key(mut self, key: impl Into<String>) -> Self {
        self.config.debug_sign_key = key.into();
        self
    }

    pub fn super_code(mut self, code: impl Into<String>) -> Self {
        self.config.super_code = code.into();
        self
    }

    /// Register a phone number that always accepts `code`.
    pub fn test_account(mut self, tel: impl Into<String>, code: impl Into<String>) -> Self {
        self.config.test_accounts.insert(tel.into(), code.into());
        self
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn max_request_size(mut self, size: usize) -> Self {
        self.config.max_request_size = size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Validate and build the configuration.
    ///
    /// Fails if the token cipher cannot be initialised or a value is out of range.
    pub fn build(self) -> Result<AuthConfig, ConfigError> {
        let config = self.config;

        // Surfaces bad key material before anything is served.
        config.token_codec()?;

        if config.checksum_length > 22 {
            return Err(ConfigError::invalid(
                "checksum_length",
                config.checksum_length.to_string(),
            ));
        }
        if config.token_lifetime.is_zero() {
            return Err(ConfigError::invalid("token_lifetime", "0"));
        }
        if config.store_timeout.is_zero() {
            return Err(ConfigError::invalid("store_timeout", "0"));
        }
        if config.header_prefix.is_empty() {
            return Err(ConfigError::invalid("header_prefix", ""));
        }
        if !config.debug_sign_key.is_empty() && !cfg!(feature = "debug-sign-bypass") {
            tracing::warn!("debug_sign_key is set but this build has no debug-sign-bypass feature; ignoring it");
        }

        Ok(config)
    }
}

// ============================================================================
// TOML file
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    token_key: Option<String>,
    token_iv: Option<String>,
    checksum_magic: Option<String>,
    checksum_length: Option<usize>,
    checksum_encoding: Option<DigestEncoding>,
    token_ttl: Option<String>,
    sms_code_ttl: Option<String>,
    store_timeout: Option<String>,
    header_prefix: Option<String>,
    signed_headers: Option<Vec<String>>,
    app_keys: HashMap<String, String>,
    check_sign: Option<bool>,
    admin_token: Option<String>,
    debug: Option<bool>,
    debug_sign_key: Option<String>,
    super_code: Option<String>,
    test_accounts: HashMap<String, String>,
    listen: Option<String>,
    max_request_size: Option<usize>,
    request_timeout: Option<String>,
}

impl FileConfig {
    fn into_builder(self) -> Result<AuthConfigBuilder, ConfigError> {
        let mut b = AuthConfig::builder();

        if let Some(v) = self.token_key {
            b = b.token_key(v);
        }
        if let Some(v) = self.token_iv {
            b = b.token_iv(v);
        }
        if let Some(v) = self.checksum_magic {
            b = b.checksum_magic(v);
        }
        if let Some(v) = self.checksum_length {
            b = b.checksum_length(v);
        }
        if let Some(v) = self.checksum_encoding {
            b = b.checksum_encoding(v);
        }
        if let Some(v) = self.token_ttl {
            b = b.token_lifetime(env_duration("token_ttl", &v)?);
        }
        if let Some(v) = self.sms_code_ttl {
            b = b.sms_code_lifetime(env_duration("sms_code_ttl", &v)?);
        }
        if let Some(v) = self.store_timeout {
            b = b.store_timeout(env_duration("store_timeout", &v)?);
        }
        if let Some(v) = self.header_prefix {
            b = b.header_prefix(v);
        }
        if let Some(v) = self.signed_headers {
            b = b.signed_headers(v);
        }
        for (id, secret) in self.app_keys {
            b = b.app_key(id, secret);
        }
        if let Some(v) = self.check_sign {
            b = b.check_sign(v);
        }
        if let Some(v) = self.admin_token {
            b = b.admin_token(v);
        }
        if let Some(v) = self.debug {
            b = b.debug(v);
        }
        if let Some(v) = self.debug_sign_key {
            b = b.debug_sign_key(v);
        }
        if let Some(v) = self.super_code {
            b = b.super_code(v);
        }
        for (tel, code) in self.test_accounts {
            b = b.test_account(tel, code);
        }
        if let Some(v) = self.listen {
            b = b.listen_addr(v);
        }
        if let Some(v) = self.max_request_size {
            b = b.max_request_size(v);
        }
        if let Some(v) = self.request_timeout {
            b = b.request_timeout(env_duration("request_timeout", &v)?);
        }

        Ok(b)
    }
}
