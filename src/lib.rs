//! # account-guard
//!
//! Session tokens, request signing and route authorization for an Axum
//! account service.
//!
//! ## Features
//!
//! - **Session tokens**: AES-CFB encrypted, checksum-suffixed, tagged `T1`/`A1`
//! - **Session store**: live-token registry over a cache backend with TTL and a hard timeout
//! - **Request signing**: canonical path/query/headers/body hash, SHA-1 with a per-app secret
//! - **Route trust levels**: `None`, `User`, `Admin`, enforced by middleware
//! - **Structured failures**: `{"ok": false, "reason": "ERR_...", "errmsg": ...}`
//! - **Structured logging**: tracing with security audit events
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use account_guard::{handlers, AuthConfig, MemoryCache, MemoryUserDirectory, SystemClock};
//! use account_guard::observability::{ObservabilityConfig, init};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init(&ObservabilityConfig::from_env())?;
//!
//!     let config = Arc::new(AuthConfig::from_env()?);
//!     let state = handlers::AppState::new(
//!         config.clone(),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(MemoryUserDirectory::new()),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//!     axum::serve(listener, handlers::router(state)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security notes
//!
//! The token checksum is a keyless digest over the data and a fixed magic
//! value. It catches corrupted or truncated tokens before decryption; it is
//! not an integrity guarantee against anyone who knows the magic value.

pub mod account;
pub mod checksum;
pub mod clock;
pub mod config;
mod crypto;
pub mod error;
pub mod handlers;
pub mod layers;
pub mod middleware;
pub mod observability;
mod parse;
pub mod policy;
pub mod session;
pub mod signing;
pub mod sms;
pub mod store;
pub mod token;
pub mod users;

// Re-exports
pub use checksum::{ChecksumCodec, DigestEncoding};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, AuthConfigBuilder, ConfigError};
pub use crypto::{constant_time_eq, constant_time_str_eq, sha1_hex};
pub use error::{ApiError, ApiResponse, AuthError, Reason};
pub use layers::AccountRouter;
pub use middleware::{AppId, AuthState, Identity};
pub use parse::{parse_duration, parse_flag};
pub use policy::{RouteRule, RouteTrustPolicy, TrustLevel};
pub use session::{SessionError, SessionStore};
pub use signing::{AppKeyRegistry, RequestSigner, SignedRequest};
pub use store::{CacheBackend, MemoryCache, StoreError, TimedStore};
pub use token::{TokenClaims, TokenCodec, TokenError, TokenTag};
pub use users::{ClientMeta, LoginRecord, MemoryUserDirectory, UserDirectory, UserRecord, UserStatus};
