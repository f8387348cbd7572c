//! Relational store for accounts, users, and conversation anchors
//!
//! Backed by MySQL through sqlx. The schema lives in
//! `migrations/schema.sql`; the binder and the lifecycle worker are the
//! only writers.

pub mod accounts;
pub mod binder;

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use crate::error::AppResult;

/// Shared handle to the metadata store
#[derive(Clone)]
pub struct Store {
    pool: MySqlPool,
}

impl Store {
    /// Connect eagerly, failing fast on an unreachable database.
    pub async fn connect(uri: &str) -> AppResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(uri)
            .await?;
        Ok(Self { pool })
    }

    /// Connect lazily; the first query opens the connection. Lets tests
    /// construct state without a running database.
    pub fn connect_lazy(uri: &str) -> AppResult<Self> {
        let pool = MySqlPoolOptions::new().max_connections(10).connect_lazy(uri)?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}
