use thiserror::Error;

/// Core error type for rung operations.
#[derive(Error, Debug)]
pub enum RungError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upgrade and downgrade file labels do not pair up.
    #[error("Upgrade versions and downgrade versions do not match: {0}")]
    ConfigMismatch(String),

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Batch {0} was never recorded in the migration ledger")]
    BatchNotFound(i32),

    /// Ledger rows are not monotonic or reference versions that do not exist.
    #[error("Corrupt migration ledger: {0}")]
    CorruptLedger(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver error from a statement, passed through untouched.
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RungError {
    fn from(e: serde_json::Error) -> Self {
        RungError::Serialization(e.to_string())
    }
}

/// Result type alias using RungError.
pub type Result<T> = std::result::Result<T, RungError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_not_found_message() {
        let err = RungError::BatchNotFound(7);
        assert_eq!(
            err.to_string(),
            "Batch 7 was never recorded in the migration ledger"
        );
    }

    #[test]
    fn test_sql_error_is_transparent() {
        let err = RungError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.to_string(), sqlx::Error::RowNotFound.to_string());
        assert!(matches!(err, RungError::Sql(sqlx::Error::RowNotFound)));
    }
}
