//! Bounded reconnect policy applied when a connection is checked out.
//!
//! A checked out connection is probed once. When the probe fails the
//! connection is discarded and replaced, at most `max_reconnects` times.
//! There is no backoff; retrying failed work is the caller's business.

use std::future::Future;

use rung_core::error::{Result, RungError};
use tracing::warn;

/// A connection that can be probed and thrown away.
pub trait Liveness: Sized + Send {
    /// Cheap round trip proving the connection still works.
    fn probe(&mut self) -> impl Future<Output = std::result::Result<(), sqlx::Error>> + Send;

    /// Close a connection that failed its probe.
    fn discard(self) -> impl Future<Output = ()> + Send;
}

/// How many times a dead connection is replaced before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_reconnects: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_reconnects: 1 }
    }
}

impl ReconnectPolicy {
    pub fn new(max_reconnects: u32) -> Self {
        Self { max_reconnects }
    }

    pub fn max_reconnects(&self) -> u32 {
        self.max_reconnects
    }

    /// Return `conn` if it is alive, otherwise a replacement from `reconnect`.
    pub async fn ensure_live<C, R, Fut>(&self, mut conn: C, mut reconnect: R) -> Result<C>
    where
        C: Liveness,
        R: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<C, sqlx::Error>>,
    {
        let mut attempts = 0;

        loop {
            let err = match conn.probe().await {
                Ok(()) => return Ok(conn),
                Err(e) => e,
            };

            conn.discard().await;

            if attempts >= self.max_reconnects {
                return Err(RungError::ConnectionFailure(format!(
                    "connection is dead after {} reconnect attempt(s): {}",
                    attempts, err
                )));
            }

            attempts += 1;
            warn!(
                attempt = attempts,
                max_reconnects = self.max_reconnects,
                error = %err,
                "Database connection is broken, reconnecting"
            );

            conn = reconnect()
                .await
                .map_err(|e| RungError::ConnectionFailure(format!("Reconnect failed: {}", e)))?;
        }
    }
}
