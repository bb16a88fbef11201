//! otx-daemon entry point.
//!
//! Thin by design: resolve config (exit 1 on missing secret, 2 on
//! invalid values), verify the encryption key, connect the store (exit 1
//! when unreachable), start the worker pool, serve HTTP.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use otx_config::AppConfig;
use otx_daemon::registry::{build_registry, Deadlines};
use otx_daemon::{routes, state::AppState};
use otx_db::PgGateway;
use otx_quality::{HttpQuoteProvider, QuoteProvider, StaticQuoteProvider};
use otx_queue::{RetryPolicy, WorkerPool, WorkerPoolConfig};
use otx_secrets::SecretStore;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return exit_code(e.exit_code());
        }
    };

    // The key must decode before anything runs; a process without a
    // working secret store must refuse to begin.
    if let Err(e) = SecretStore::from_base64_key(&config.encryption_key_b64) {
        error!("encryption key rejected: {e}");
        return exit_code(2);
    }

    let pool = match otx_db::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("database unreachable at startup: {e:#}");
            return exit_code(1);
        }
    };
    if let Err(e) = otx_db::migrate(&pool).await {
        error!("migrations failed: {e:#}");
        return exit_code(1);
    }

    let gateway = Arc::new(PgGateway::new(pool));
    let provider = quote_provider(&config);
    let shared = Arc::new(AppState::new(&config, gateway, provider));

    let registry = Arc::new(build_registry(
        &shared,
        Deadlines {
            generator: config.generator_deadline_secs,
            historical: config.historical_deadline_secs,
        },
    ));
    let workers = WorkerPool::start(
        shared.gateway.clone(),
        registry,
        shared.clock.clone(),
        WorkerPoolConfig {
            worker_count: config.worker_count,
            claim_batch_size: config.claim_batch_size,
            poll_interval: Duration::from_secs(1),
            lease_timeout_secs: config.lease_timeout_secs,
            retry: RetryPolicy {
                base_secs: config.backoff_base_secs,
                cap_secs: config.backoff_cap_secs,
            },
        },
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8787)));
    info!("otx-daemon listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind failed: {e}");
            return exit_code(1);
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!("server crashed: {e}");
        workers.shutdown().await;
        return exit_code(1);
    }

    workers.shutdown().await;
    info!("clean shutdown");
    ExitCode::SUCCESS
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn quote_provider(config: &AppConfig) -> Arc<dyn QuoteProvider> {
    match &config.quote_provider_url {
        Some(url) => match HttpQuoteProvider::new(
            url.clone(),
            config.quote_provider_key.clone(),
            Duration::from_secs(config.provider_timeout_secs),
        ) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                tracing::warn!("quote provider client failed to build ({e}); quotes disabled");
                Arc::new(StaticQuoteProvider::default())
            }
        },
        None => {
            tracing::warn!("no quote provider configured; every symbol will fail the gate");
            Arc::new(StaticQuoteProvider::default())
        }
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("OTX_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// CORS: allow only localhost origins (the web UI dev servers).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
