//! Owned pool of PostgreSQL clients with generation-tracked reconnects.
//!
//! Every checkout returns a client together with the pool's epoch. A writer
//! that fails on a client reports that epoch to [`PgPool::reconnect`]; only
//! the first report for an epoch rebuilds the pool, later ones find a newer
//! epoch and return immediately.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use table_sink::SinkError;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls};

/// Default number of startup connection attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
/// Default delay between startup connection attempts.
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_secs(2);
/// Default limit on rebuilding the pool after a failure.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a [`PgPool`].
#[derive(Clone, Debug)]
pub struct PgPoolConfig {
    pub connection_string: String,
    pub size: usize,
    pub connect_attempts: u32,
    pub connect_delay: Duration,
    /// Limit on a pool rebuild; writers wait on it
    pub reconnect_timeout: Duration,
}

impl PgPoolConfig {
    pub fn new(connection_string: impl Into<String>, size: usize) -> Self {
        Self {
            connection_string: connection_string.into(),
            size: size.max(1),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_delay: DEFAULT_CONNECT_DELAY,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
        }
    }
}

struct Generation {
    epoch: u64,
    clients: Vec<Arc<Client>>,
}

/// A client checked out of the pool.
pub struct PooledClient {
    pub client: Arc<Client>,
    pub epoch: u64,
}

pub struct PgPool {
    config: PgPoolConfig,
    generation: RwLock<Generation>,
    next: AtomicUsize,
}

impl PgPool {
    /// Open `config.size` connections, retrying the first one at startup.
    pub async fn connect(config: PgPoolConfig) -> Result<Self, SinkError> {
        let first = connect_with_retries(
            &config.connection_string,
            config.connect_attempts,
            config.connect_delay,
        )
        .await?;

        let mut clients = vec![Arc::new(first)];
        for _ in 1..config.size {
            clients.push(Arc::new(connect_once(&config.connection_string).await?));
        }
        tracing::debug!("PostgreSQL pool ready with {} connections", clients.len());

        Ok(Self {
            config,
            generation: RwLock::new(Generation { epoch: 0, clients }),
            next: AtomicUsize::new(0),
        })
    }

    /// Next client in round-robin order.
    pub async fn checkout(&self) -> PooledClient {
        let generation = self.generation.read().await;
        let index = self.next.fetch_add(1, Ordering::Relaxed) % generation.clients.len();
        PooledClient {
            client: Arc::clone(&generation.clients[index]),
            epoch: generation.epoch,
        }
    }

    pub async fn epoch(&self) -> u64 {
        self.generation.read().await.epoch
    }

    /// Replace every connection if the pool is still at `stale_epoch`.
    pub async fn reconnect(&self, stale_epoch: u64) -> Result<(), SinkError> {
        let mut generation = self.generation.write().await;
        if generation.epoch != stale_epoch {
            return Ok(());
        }

        generation.clients = within(self.config.reconnect_timeout, self.open_clients()).await?;
        generation.epoch += 1;
        tracing::info!(
            "Reconnected to PostgreSQL (pool generation {})",
            generation.epoch
        );
        Ok(())
    }

    async fn open_clients(&self) -> Result<Vec<Arc<Client>>, SinkError> {
        let mut clients = Vec::with_capacity(self.config.size);
        for _ in 0..self.config.size {
            clients.push(Arc::new(connect_once(&self.config.connection_string).await?));
        }
        Ok(clients)
    }
}

async fn within<T, F>(limit: Duration, fut: F) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, SinkError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Connect {
            message: format!("reconnect timed out after {:.1}s", limit.as_secs_f64()),
        }),
    }
}

/// Connect with retries; used at startup where the server may still be
/// coming up.
pub async fn connect_with_retries(
    connection_string: &str,
    attempts: u32,
    delay: Duration,
) -> Result<Client, SinkError> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match connect_once(connection_string).await {
            Ok(client) => {
                if attempt > 1 {
                    tracing::info!("Connected to PostgreSQL after {} attempts", attempt);
                }
                return Ok(client);
            }
            Err(e) => {
                if attempt < attempts {
                    tracing::warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}): {}. Retrying in {}s...",
                        attempt,
                        attempts,
                        e.message(),
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(SinkError::Connect {
        message: format!(
            "failed to connect to PostgreSQL after {attempts} attempts: {}",
            last_error
                .as_ref()
                .map(SinkError::message)
                .unwrap_or("unknown error")
        ),
    })
}

async fn connect_once(connection_string: &str) -> Result<Client, SinkError> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| SinkError::Connect {
            message: e.to_string(),
        })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| SinkError::Connect {
            message: e.to_string(),
        })?;

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PgPoolConfig::new("host=localhost", 0);
        assert_eq!(config.size, 1);
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.connect_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_attempts() {
        // Nothing listens on port 1
        let err = connect_with_retries(
            "host=127.0.0.1 port=1 user=postgres connect_timeout=1",
            2,
            Duration::ZERO,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SinkError::Connect { .. }));
        assert!(err.message().contains("after 2 attempts"));
    }

    fn unreachable_pool(epoch: u64) -> PgPool {
        let mut config =
            PgPoolConfig::new("host=127.0.0.1 port=1 user=postgres connect_timeout=1", 1);
        config.reconnect_timeout = Duration::from_secs(5);
        PgPool {
            config,
            generation: RwLock::new(Generation {
                epoch,
                clients: Vec::new(),
            }),
            next: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_within_times_out_silent_step() {
        let err = within(
            Duration::from_millis(10),
            std::future::pending::<Result<(), SinkError>>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SinkError::Connect { .. }));
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_reconnect_skips_newer_epoch() {
        let pool = unreachable_pool(3);
        pool.reconnect(2).await.unwrap();
        assert_eq!(pool.epoch().await, 3);
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_epoch() {
        let pool = unreachable_pool(0);
        assert!(pool.reconnect(0).await.is_err());
        assert_eq!(pool.epoch().await, 0);
    }
}
