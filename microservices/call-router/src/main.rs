//! Call Router Microservice
//!
//! Multi-tenant PBX call-routing core:
//! - Inbound webhook routing to CXML call-control documents
//! - DID, extension, ring-group, IVR, conference and AI-assistant targets
//! - Business-hours gating with per-schedule timezones
//! - Webhook trust layer: bearer auth, idempotent replay, rate limiting

mod auth;
mod config;
mod cxml;
mod engine;
mod error;
mod handlers;
mod hours;
mod idempotency;
mod number;
mod rate_limit;
mod resolver;
mod routes;
mod webhook;


use std::sync::Arc;

use pbx_core::SystemClock;
use pbx_store::{MemoryRoutingStore, PgRoutingStore, PoolConfig, RoutingStore};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use config::Config;
pub use error::{Error, Result};

use auth::TrustLayer;
use engine::RoutingEngine;
use idempotency::IdempotencyLayer;
use rate_limit::RateLimiter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoutingStore>,
    pub engine: Arc<RoutingEngine>,
    pub trust: Arc<TrustLayer>,
    pub idempotency: Arc<IdempotencyLayer>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(store: Arc<dyn RoutingStore>) -> Self {
        let clock = Arc::new(SystemClock);
        let cache = Arc::new(pbx_store::MemoryCache::new());
        Self {
            engine: Arc::new(RoutingEngine::new(store.clone(), clock)),
            trust: Arc::new(TrustLayer::new(store.clone())),
            idempotency: Arc::new(IdempotencyLayer::new(cache.clone())),
            rate_limiter: Arc::new(RateLimiter::new(cache)),
            store,
        }
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn RoutingStore>> {
    if config.store_backend == "memory" {
        let store = match &config.seed_file {
            Some(path) => {
                let fixture = tokio::fs::read_to_string(path).await?;
                MemoryRoutingStore::from_json(&fixture)?
            }
            None => MemoryRoutingStore::new(),
        };
        info!("Using in-memory routing store");
        return Ok(Arc::new(store));
    }

    let pool = PoolConfig {
        url: config.database_url.clone(),
        max_size: config.db_pool_size,
    };
    let store = PgRoutingStore::connect(pool).await?;
    info!("Connected routing store pool");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .json()
        .init();

    info!("Starting Call Router microservice");

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_address()?;

    // Initialize the routing store
    let store = build_store(&config).await?;

    // Build application state
    let state = AppState::new(store);

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Call Router listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
