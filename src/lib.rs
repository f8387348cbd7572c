//! Switchboard - OpenAI-compatible chat gateway over a pool of upstream accounts
//!
//! End users speak the standard completion protocol; the gateway forwards
//! each request to one of several authenticated upstream sessions,
//! honoring per-account rate limits, token lifetimes, and conversation
//! continuity for registered end users.

pub mod config;
pub mod crypto;
pub mod error;
pub mod jwt;
pub mod limiter;
pub mod middleware;
pub mod openai;
pub mod pool;
pub mod routes;
pub mod store;
pub mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

pub use crate::config::Config;
pub use crate::crypto::Sealer;
pub use crate::limiter::RateLimiter;
pub use crate::pool::{BotPool, LifecycleCommand, LifecycleWorker};
pub use crate::store::Store;
pub use crate::upstream::{ArkoseClient, AuthClient, BotSession};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub pool: Arc<BotPool>,
    pub store: Arc<Store>,
    pub sealer: Sealer,
    /// Channel into the lifecycle worker's health loop
    pub lifecycle: mpsc::Sender<LifecycleCommand>,
}

impl AppState {
    /// Create the full application state and start the lifecycle worker.
    pub async fn new(config: Config) -> Result<Self> {
        let redis_client =
            redis::Client::open(config.redis_uri.as_str()).context("invalid redis_uri")?;
        let redis = redis::aio::ConnectionManager::new(redis_client)
            .await
            .context("cannot reach the rate-limit store")?;
        let limiter = Arc::new(RateLimiter::new(redis));

        let store = Arc::new(
            Store::connect(&config.mysql_uri)
                .await
                .context("cannot reach the metadata store")?,
        );

        let sealer =
            Sealer::from_key(&config.account_key).context("account_key is not a usable key")?;

        let pool = Arc::new(BotPool::new(limiter, store.clone()));

        let http_client = reqwest::Client::new();
        let worker = LifecycleWorker::new(
            pool.clone(),
            store.clone(),
            sealer.clone(),
            AuthClient::new(http_client.clone(), &config.chatgpt_auth_url),
            ArkoseClient::new(http_client, &config.captcha_url),
            &config.chatgpt_base_url,
        );
        let (lifecycle, _health, _login) = worker.spawn();

        Ok(Self {
            config,
            pool,
            store,
            sealer,
            lifecycle,
        })
    }
}
