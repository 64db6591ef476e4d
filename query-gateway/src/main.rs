use std::env;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use common_audit::AuditSink;
use common_auth::{AuthOptions, Authenticator};

use query_gateway::backend::BackendClient;
use query_gateway::cache::ResponseCache;
use query_gateway::config::GatewayConfig;
use query_gateway::rate_limiter::{RateLimiter, RedisWindow, SharedWindow};
use query_gateway::{router, AppState};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config_path =
        env::var("QUERY_GATEWAY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = GatewayConfig::load(Path::new(&config_path))?;

    let auth = Authenticator::connect(auth_options(&config))
        .await
        .context("init auth")?;

    let shared_window: Option<Arc<dyn SharedWindow>> =
        match (config.rate_limiter.enabled, config.rate_limiter.redis_url.as_deref()) {
            (true, Some(url)) if !url.is_empty() => {
                let window = RedisWindow::connect(url).await.context("init redis")?;
                Some(Arc::new(window))
            }
            _ => None,
        };
    let limiter = RateLimiter::new(&config.rate_limiter, shared_window);

    let cache = ResponseCache::new(&config.cache);
    let backend = BackendClient::connect(&config.backends)
        .await
        .context("init backend")?;
    let audit = build_audit_sink(&config)?;

    let state = AppState {
        auth: Arc::new(auth),
        limiter: Arc::new(limiter),
        cache: Arc::new(cache),
        backend: Arc::new(backend),
        audit: Arc::new(audit),
    };

    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .with_context(|| format!("parse listen address {}", config.server.address))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "query gateway listening");

    serve(listener, router(state)).await
}

/// Runs the server until a termination signal, then drains in-flight
/// requests for at most `SHUTDOWN_GRACE` before aborting them.
async fn serve(listener: TcpListener, app: axum::Router) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            result.context("server task")?.context("serve")?;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    info!("shutting down, draining connections");
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => {
            result.context("server task")?.context("serve")?;
        }
        Err(_) => {
            warn!("drain deadline exceeded, aborting in-flight requests");
            server.abort();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn auth_options(config: &GatewayConfig) -> AuthOptions {
    let auth = &config.auth;
    AuthOptions {
        enabled: auth.enabled,
        jwks_url: auth.jwks_url.clone(),
        audience: auth.audience.clone(),
        issuer: auth.issuer.clone(),
        tenant_claim: auth.tenant_claim.clone(),
        user_claim: auth.user_claim.clone(),
        keyset_ttl: auth.cache_ttl,
        insecure_tls: auth.insecure_tls,
    }
}

fn build_audit_sink(config: &GatewayConfig) -> Result<AuditSink> {
    match config.audit.path.as_deref() {
        Some(path) if !path.is_empty() => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open audit journal {path}"))?;
            Ok(AuditSink::new(config.audit.enabled, Box::new(file)))
        }
        _ => Ok(AuditSink::stdout(config.audit.enabled)),
    }
}
