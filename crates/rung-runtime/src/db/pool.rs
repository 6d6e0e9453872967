use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use rung_core::config::DatabaseConfig;
use rung_core::error::{Result, RungError};

use super::reconnect::{Liveness, ReconnectPolicy};

/// Bounded PostgreSQL connection pool.
///
/// Every checkout holds one permit of a semaphore sized to
/// `max_connections`, so no more than that many connections are ever out at
/// once and excess callers wait instead of failing. Cloning is cheap and
/// shares the same connections and permits.
#[derive(Clone)]
pub struct ConnectionPool {
    /// Underlying sqlx pool.
    pool: PgPool,

    /// Options for ad-hoc connections outside the pool.
    options: Arc<PgConnectOptions>,

    /// Checkout gate.
    permits: Arc<Semaphore>,

    max_connections: u32,
    acquire_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl ConnectionPool {
    /// Create the pool and open its minimum connections.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL...");
        let options = Self::connect_options(config)?;
        let pool = Self::pool_options(config)
            .connect_with(options.clone())
            .await
            .map_err(|e| RungError::ConnectionFailure(format!("Failed to connect: {}", e)))?;

        Ok(Self::from_parts(pool, options, config))
    }

    /// Create the pool without opening any connection yet.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let options = Self::connect_options(config)?;
        let pool = Self::pool_options(config).connect_lazy_with(options.clone());
        Ok(Self::from_parts(pool, options, config))
    }

    fn from_parts(pool: PgPool, options: PgConnectOptions, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            options: Arc::new(options),
            permits: Arc::new(Semaphore::new(config.max_connections as usize)),
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            reconnect: ReconnectPolicy::new(config.reconnect_attempts),
        }
    }

    fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| RungError::Config(format!("Invalid database url: {}", e)))?;

        Ok(options
            .application_name("rung")
            .options(config.keepalive.as_runtime_params()))
    }

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
    }

    /// Check a connection out, waiting for a free slot.
    ///
    /// The connection is probed before it is handed out; a dead one is
    /// replaced according to the reconnect policy.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self.acquire_permit().await?;

        let conn = self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => RungError::Timeout(format!(
                "no connection became available within {:?}",
                self.acquire_timeout
            )),
            sqlx::Error::PoolClosed => RungError::PoolClosed,
            other => RungError::ConnectionFailure(other.to_string()),
        })?;

        let options = self.options.clone();
        let handle = self
            .reconnect
            .ensure_live(Handle::Pooled(conn), move || {
                let options = options.clone();
                async move { PgConnection::connect_with(&options).await.map(Handle::Fresh) }
            })
            .await?;

        debug!(
            in_use = self.in_use(),
            max_connections = self.max_connections,
            "Database connection acquired"
        );

        Ok(PooledConnection {
            handle,
            _permit: permit,
        })
    }

    /// Return a connection to the pool and free its slot.
    ///
    /// Dropping a [`PooledConnection`] does the same; this spells it out.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
        debug!(in_use = self.in_use(), "Database connection released");
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(RungError::PoolClosed),
            Err(_) => Err(RungError::Timeout(format!(
                "all {} connections stayed checked out for {:?}",
                self.max_connections, self.acquire_timeout
            ))),
        }
    }

    /// Open a fresh connection outside the pool and run a round trip on it.
    pub async fn health_check_connection(&self) -> Result<()> {
        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| {
                error!("Cannot connect to database: {}", e);
                RungError::ConnectionFailure(format!("Cannot connect to database: {}", e))
            })?;

        let checked = async {
            let mut tx = conn.begin().await?;
            sqlx::query("SELECT 1").execute(&mut *tx).await?;
            tx.commit().await
        }
        .await;

        if let Err(e) = conn.close().await {
            debug!("Closing health check connection failed: {}", e);
        }

        checked.map_err(|e| {
            error!("Database health check failed: {}", e);
            RungError::ConnectionFailure(format!("Health check failed: {}", e))
        })
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        (self.max_connections as usize).saturating_sub(self.permits.available_permits())
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop handing out connections and close every pooled one.
    ///
    /// Waits for checked out connections to come back first.
    pub async fn close(&self) {
        self.permits.close();
        self.pool.close().await;
        info!("Connection pool closed");
    }
}

/// Either a pooled connection or one opened after a pooled one died.
enum Handle {
    Pooled(PoolConnection<Postgres>),
    Fresh(PgConnection),
}

impl Deref for Handle {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Handle::Pooled(conn) => &**conn,
            Handle::Fresh(conn) => conn,
        }
    }
}

impl DerefMut for Handle {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Handle::Pooled(conn) => &mut **conn,
            Handle::Fresh(conn) => conn,
        }
    }
}

impl Liveness for Handle {
    fn probe(&mut self) -> impl Future<Output = std::result::Result<(), sqlx::Error>> + Send {
        self.deref_mut().ping()
    }

    fn discard(self) -> impl Future<Output = ()> + Send {
        async move {
            let conn = match self {
                Handle::Pooled(conn) => conn.detach(),
                Handle::Fresh(conn) => conn,
            };
            if let Err(e) = conn.close().await {
                debug!("Closing broken connection failed: {}", e);
            }
        }
    }
}

/// A checked out connection.
///
/// Dereferences to [`PgConnection`]. On drop the connection goes back to the
/// pool (or is closed, if it was opened ad hoc) and only then is the slot
/// freed: fields drop in declaration order.
pub struct PooledConnection {
    handle: Handle,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Close the connection on drop instead of returning it to the pool.
    pub fn close_on_drop(&mut self) {
        if let Handle::Pooled(conn) = &mut self.handle {
            conn.close_on_drop();
        }
    }
}

impl Deref for PooledConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.handle
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.handle
    }
}
