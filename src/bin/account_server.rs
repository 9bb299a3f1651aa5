//! Account service
//!
//! Runs the account API on the configured address.
//!
//! Configuration is read from the TOML file named by `ACCOUNT_CONFIG` if set,
//! otherwise from `ACCOUNT_*` environment variables. Logging is controlled by
//! `LOG_FORMAT` and `RUST_LOG`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use account_guard::observability::{self, security_event, ObservabilityConfig, SecurityEvent};
use account_guard::{handlers, AuthConfig, MemoryCache, MemoryUserDirectory, SystemClock};
use anyhow::Context;
use tower_http::trace::TraceLayer;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let observability_config = ObservabilityConfig::from_env();
    observability::init(&observability_config)?;

    let config = match std::env::var("ACCOUNT_CONFIG") {
        Ok(path) => AuthConfig::from_toml_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => AuthConfig::from_env().context("reading ACCOUNT_* environment")?,
    };
    let config = Arc::new(config);

    if config.app_keys.is_empty() && config.check_sign {
        tracing::warn!("No application keys configured; signed routes will reject every request");
    }
    if config.debug {
        tracing::warn!("Debug mode enabled; super code and debug sign key are active");
    }

    let cache = Arc::new(MemoryCache::new());
    let state = handlers::AppState::new(
        config.clone(),
        cache.clone(),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(SystemClock),
    )
    .context("initialising token codec")?;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Expired cache entries purged");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    security_event!(
        SecurityEvent::SystemStartup,
        listen_addr = %config.listen_addr,
        apps = config.app_keys.len(),
        check_sign = config.check_sign,
        "Account service listening"
    );

    let mut app = handlers::router(state);
    if observability_config.enable_request_tracing {
        app = app.layer(TraceLayer::new_for_http());
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    security_event!(SecurityEvent::SystemShutdown, "Account service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
