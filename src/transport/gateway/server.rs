use super::handlers::{handle_deliver, handle_health, handle_verify};
use super::AppState;

use crate::config::{Config, GatewayConfig, LockBackend};
use crate::integrations::github::GithubDispatcher;
use crate::integrations::storage::QingStorUploader;
use crate::integrations::{ImageSyncDispatcher, Messenger, ObjectUploader};
use crate::sync::{
    CompletionWatcher, DedupFilter, JobRunner, SharedClock, SyncServices, SystemClock, TaskLock,
    WatchSettings,
};
use crate::transport::wecom::{CallbackDecoder, WeComClient};
use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Run the HTTP gateway until Ctrl-C, then drain background jobs.
pub async fn run_gateway(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    let state = build_gateway_state(&config)?;
    run_gateway_with_listener(listener, &config.gateway, state, shutdown_signal()).await
}

/// Wire every collaborator from configuration.
pub fn build_gateway_state(config: &Config) -> Result<AppState> {
    let clock: SharedClock = Arc::new(SystemClock);

    let decoder = CallbackDecoder::from_config(&config.wecom)
        .context("initialise callback decoder")?;
    let messenger: Arc<dyn Messenger> =
        Arc::new(WeComClient::from_config(config).context("initialise messaging client")?);
    let dispatcher: Arc<dyn ImageSyncDispatcher> =
        Arc::new(GithubDispatcher::from_config(config).context("initialise image-sync dispatcher")?);
    let uploader = match config.storage.as_ref() {
        Some(storage) => Some(Arc::new(
            QingStorUploader::from_config(config, storage).context("initialise object uploader")?,
        ) as Arc<dyn ObjectUploader>),
        None => None,
    };

    let watcher = Arc::new(CompletionWatcher::new(
        Arc::clone(&dispatcher),
        Arc::clone(&messenger),
        Arc::clone(&clock),
        WatchSettings::from(&config.sync),
    ));

    let lock_timeout = Duration::from_secs(config.sync.lock_timeout_secs);
    let lock = match config.sync.lock_backend {
        LockBackend::File => TaskLock::file(config.lock_path(), lock_timeout, Arc::clone(&clock)),
        LockBackend::Memory => TaskLock::memory(lock_timeout, Arc::clone(&clock)),
    };

    let jobs = JobRunner::new(SyncServices {
        messenger,
        dispatcher,
        uploader,
        watcher,
    });

    Ok(AppState {
        decoder: Arc::new(decoder),
        dedup: Arc::new(DedupFilter::new(Duration::from_secs(
            config.sync.dedup_window_secs,
        ))),
        lock,
        jobs: Arc::new(jobs),
        clock,
        registry: Arc::new(config.registry.clone()),
    })
}

/// Serve on a pre-bound listener until `shutdown` resolves, then give
/// background jobs `shutdown_grace_secs` to finish.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    gateway: &GatewayConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local = listener
        .local_addr()
        .context("get gateway listener local address")?;
    print_gateway_banner(&local.to_string(), gateway);

    let jobs = Arc::clone(&state.jobs);
    let app = build_app(state, gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve HTTP gateway")?;

    tracing::info!(in_flight = jobs.in_flight(), "gateway stopped, draining background jobs");
    jobs.drain(Duration::from_secs(gateway.shutdown_grace_secs))
        .await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn print_gateway_banner(display_addr: &str, gateway: &GatewayConfig) {
    println!("Gateway listening on {display_addr}");
    println!("  GET  {} -> URL verification", gateway.callback_path);
    println!("  POST {} -> message delivery", gateway.callback_path);
    println!("  GET  /health");
}

pub fn build_app(state: AppState, gateway: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route(
            &gateway.callback_path,
            get(handle_verify).post(handle_deliver),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(gateway.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
}
