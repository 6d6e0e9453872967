//! Transactional unit of work over one pooled connection.
//!
//! ```ignore
//! let mut session = pool.begin_session().await?;
//! let outcome = do_work(session.conn()).await;
//! let value = session.finish(outcome).await?;
//! ```
//!
//! `finish` commits when the work succeeded and rolls back otherwise, handing
//! the work's own error back unchanged. Either way the connection is
//! released exactly once.

use sqlx::postgres::PgConnection;
use tracing::{debug, error, warn};

use rung_core::error::Result;

use super::pool::{ConnectionPool, PooledConnection};

impl ConnectionPool {
    /// Check out a connection and open a transaction on it.
    pub async fn begin_session(&self) -> Result<Session> {
        let mut conn = self.acquire().await?;

        if let Err(e) = sqlx::raw_sql("BEGIN").execute(&mut *conn).await {
            conn.close_on_drop();
            return Err(e.into());
        }

        debug!("Session started");
        Ok(Session {
            conn,
            finished: false,
        })
    }
}

/// An open transaction on a checked out connection.
///
/// A session dropped without [`Session::finish`] (a panic, or a cancelled
/// future) closes its connection rather than returning it to the pool, so
/// the server discards the open transaction.
pub struct Session {
    conn: PooledConnection,
    finished: bool,
}

impl Session {
    /// The connection the unit of work runs on.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Commit on `Ok`, roll back on `Err`, then release the connection.
    pub async fn finish<T>(mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                if let Err(e) = sqlx::raw_sql("COMMIT").execute(&mut *self.conn).await {
                    error!("Commit failed: {}", e);
                    return Err(e.into());
                }
                self.finished = true;
                debug!("Session committed");
                Ok(value)
            }
            Err(err) => {
                warn!("Rolling back session: {}", err);
                match sqlx::raw_sql("ROLLBACK").execute(&mut *self.conn).await {
                    Ok(_) => {
                        self.finished = true;
                        debug!("Session rolled back");
                    }
                    Err(e) => error!("Rollback failed: {}", e),
                }
                Err(err)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Session dropped with an open transaction, closing its connection");
            self.conn.close_on_drop();
        }
    }
}
