//! Thin wrapper around a shared Redis connection manager.
//!
//! `redis::aio::ConnectionManager` is cheaply `Clone` and reconnects
//! transparently, so every caller just clones it instead of contending on a
//! single connection or hand-rolling a take/return pool.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client;

#[derive(Clone)]
pub struct RedisState {
    pub conn: ConnectionManager,
}

impl RedisState {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
