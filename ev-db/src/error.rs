//! Database error mapping

use ev_core::EvidenceError;

use crate::schema::TRANSACTION_CONSTRAINT;

/// Map a driver error onto the shared error taxonomy
///
/// Unique violations become `Conflict` so the append path can retry on a
/// lost sequence race. A duplicate transaction id is a caller mistake and
/// becomes `Validation` instead.
pub fn map_sqlx(err: sqlx::Error) -> EvidenceError {
    match err {
        sqlx::Error::RowNotFound => EvidenceError::not_found("row not found"),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint() == Some(TRANSACTION_CONSTRAINT) {
                EvidenceError::validation("transactionId already recorded for tenant")
            } else {
                EvidenceError::conflict(db.message().to_string())
            }
        }
        sqlx::Error::Database(db) => EvidenceError::transient(db.message().to_string()),
        sqlx::Error::ColumnDecode { index, source } => {
            EvidenceError::integrity(format!("column {} failed to decode: {}", index, source))
        }
        other => EvidenceError::transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(map_sqlx(sqlx::Error::RowNotFound), EvidenceError::NotFound(_)));
    }

    #[test]
    fn test_pool_errors_are_transient() {
        let err = map_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert!(matches!(err, EvidenceError::Transient(_)));
    }
}
