use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult};
use std::{future::Future, time::Duration};
use tracing::{info, warn};

use super::CounterStore;
use crate::error::{GateError, Result};

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    pub enable_pipelining: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
            enable_pipelining: true,
        }
    }
}

/// Counter store backed by a shared Redis instance
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            GateError::Redis(e)
        })?;

        let connect_timeout = config.connection_timeout.unwrap_or(Duration::from_secs(10));
        let connection =
            match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
                Ok(Ok(conn)) => {
                    info!("Connection manager established successfully");
                    conn
                }
                Ok(Err(e)) => {
                    warn!("Failed to create connection manager: {}", e);
                    return Err(GateError::Redis(e));
                }
                Err(_) => {
                    warn!(
                        "Timeout while creating connection manager ({}s)",
                        connect_timeout.as_secs()
                    );
                    return Err(GateError::Timeout(
                        "Timeout while creating Redis connection manager".to_string(),
                    ));
                }
            };

        let store = Self { connection, config };
        store.health_check().await?;

        info!("Redis counter store initialized successfully");
        Ok(store)
    }

    /// Run one command, bounded by the configured command timeout
    async fn command<T, F>(&self, name: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match self.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| GateError::Timeout(format!("Redis {} timed out after {:?}", name, limit)))?
                .map_err(GateError::Redis),
            None => fut.await.map_err(GateError::Redis),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection.clone();
        self.command("GET", async move { conn.get::<_, Option<i64>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: i64) -> Result<()> {
        let mut conn = self.connection.clone();
        self.command("SET", async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        self.command("INCR", async move { conn.incr::<_, _, i64>(key, 1).await })
            .await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        self.command("EXPIRE", async move {
            conn.expire::<_, bool>(key, seconds as i64).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        self.command("TTL", async move { conn.ttl::<_, i64>(key).await })
            .await
    }

    async fn reset(&self, key: &str, value: i64, seconds: u64) -> Result<()> {
        if !self.config.enable_pipelining {
            self.set(key, value).await?;
            self.expire(key, seconds).await?;
            return Ok(());
        }

        let mut conn = self.connection.clone();
        self.command("SET+EXPIRE", async move {
            redis::pipe()
                .atomic()
                .set(key, value)
                .ignore()
                .expire(key, seconds as i64)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        self.command("PING", async move {
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await
    }
}
