use thiserror::Error;

/// Persistence operation error.
///
/// These are **infrastructure errors** (storage, connectivity, decoding) as
/// opposed to domain errors (validation, invariants). An insufficient-stock
/// decrement is not an error at this level; see `StockDecrement`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database constraint rejected the write.
    #[error("constraint violated in {operation}: {message}")]
    Constraint { operation: String, message: String },

    /// The connection pool is closed or no connection could be acquired.
    #[error("storage unavailable in {0}")]
    Unavailable(String),

    /// A row could not be mapped onto a domain type.
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// Any other storage failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

/// Map SQLx errors to `StoreError`, tagging them with the failing operation.
///
/// Logging is left to the `#[instrument(err)]` span of the calling store method.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                // unique, foreign key, not null, check
                Some("23505") | Some("23503") | Some("23502") | Some("23514") => {
                    StoreError::Constraint {
                        operation: operation.to_string(),
                        message,
                    }
                }
                _ => StoreError::Database(format!("{operation}: {message}")),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(operation.to_string())
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("{operation}: {e}")),
        other @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)) => StoreError::Decode(format!("{operation}: {other}")),
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}
