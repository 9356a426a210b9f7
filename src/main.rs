use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;

mod api;
mod auth;
mod backends;
mod config;
mod error;
mod gateway;
mod model;
mod rate_limit;
mod registry;
mod router;
mod state;
mod stats;
mod tiers;
mod traffic;

pub use config::Config;
pub use error::AppError;
pub use gateway::GatewayState;
pub use traffic::TrafficLog;

use auth::Auth;
use model::{Role, UserRecord};
use state::file_backend::FileBackend;
use state::redis_backend::{RedisBackend, RedisConfig};
use state::{Backend, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_gateway=info,tower_http=warn".into()),
        )
        .init();

    let config = Config::load().context("failed to load configuration")?;
    if let Some(level) = &config.log_level {
        info!(level, "LOG_LEVEL set but tracing subscriber is already initialized from RUST_LOG/default; honor this value by setting RUST_LOG instead");
    }

    // Startup order per spec.md §9: tiers → primary backend (best effort) →
    // users → providers → catalog refresh → listener.
    let tiers = tiers::load_tiers(&config.data_dir).context("failed to load tier table")?;
    info!(tiers = tiers.len(), "tier table loaded");

    let config = Arc::new(config);
    let store = Arc::new(build_store(&config).await?);

    let users = store.load_users().await;
    info!(users = users.len(), "user document loaded");
    let providers = store.load_providers().await;
    info!(providers = providers.len(), "provider document loaded");
    registry::refresh_catalog(&store).await;

    let auth = Arc::new(Auth::new(Arc::clone(&store), tiers));
    bootstrap_admin(&store, &config).await?;

    let router = Arc::new(router::Router::new(Arc::clone(&store), Arc::clone(&auth)));
    let traffic_log = Arc::new(TrafficLog::new(config.traffic_log_capacity));

    let state = Arc::new(GatewayState::new(
        Arc::clone(&config),
        store,
        auth,
        router,
        traffic_log,
    ));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "llm-gateway listening");

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = axum::Router::new()
        .merge(api::client::router(Arc::clone(&state)))
        .merge(api::admin::router(Arc::clone(&state)))
        .merge(api::ws::router(Arc::clone(&state)))
        .route("/healthz", axum::routing::get(api::health::healthz))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer)
        .layer(tower_http::cors::CorsLayer::permissive());

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Store> {
    let file_backend: Arc<dyn Backend> = Arc::new(FileBackend::new(&config.data_dir));

    let redis_backend: Option<Arc<dyn Backend>> = match &config.redis {
        Some(settings) => {
            let redis_config = RedisConfig {
                url: settings.url.clone(),
                username: settings.username.clone(),
                password: settings.password.clone(),
                db: settings.db,
                tls: settings.tls,
                key_prefix: "lmg".to_string(),
            };
            Some(Arc::new(RedisBackend::new(&redis_config)?))
        }
        None => None,
    };

    let (preferred, fallback): (Arc<dyn Backend>, Arc<dyn Backend>) =
        match (config.data_source_preference, redis_backend) {
            (config::DataSourcePreference::Redis, Some(redis)) => (redis, file_backend),
            (config::DataSourcePreference::Redis, None) => {
                anyhow::bail!("DATA_SOURCE_PREFERENCE=redis requires REDIS_URL");
            }
            (config::DataSourcePreference::Filesystem, Some(redis)) => (file_backend, redis),
            (config::DataSourcePreference::Filesystem, None) => (file_backend.clone(), file_backend),
        };

    Ok(Store::new(preferred, fallback))
}

/// Seeds a single admin `UserRecord` bound to the *literal* configured key
/// (spec.md §6's `DEFAULT_ADMIN_USER_ID`/`DEFAULT_ADMIN_API_KEY`). Unlike
/// [`Auth::generate_key`], which only ever mints new random key material,
/// bootstrap needs to install an operator-supplied key verbatim so a fresh
/// deployment has a known way in — this writes the `keys` document directly
/// rather than going through `Auth`.
async fn bootstrap_admin(store: &Arc<Store>, config: &Config) -> anyhow::Result<()> {
    let Some(bootstrap) = &config.admin_bootstrap else { return Ok(()) };

    let mut users = store.load_users().await;
    if users.values().any(|u| u.user_id == bootstrap.user_id) {
        info!(user_id = %bootstrap.user_id, "admin bootstrap user already present; leaving as-is");
        return Ok(());
    }

    users.insert(
        bootstrap.api_key.clone(),
        UserRecord {
            user_id: bootstrap.user_id.clone(),
            role: Role::Admin,
            tier: "enterprise".to_string(),
            token_usage: 0,
        },
    );

    if !store.save_users(&users).await {
        anyhow::bail!("failed to persist the bootstrap admin user to both backends");
    }

    info!(user_id = %bootstrap.user_id, "admin bootstrap user seeded");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
