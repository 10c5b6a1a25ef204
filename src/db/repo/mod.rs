//! SQLite repository implementing the persistence capabilities.
//!
//! Methods are organized across submodules by domain:
//! - `batches.rs` - Settlement batches, rows and posting claims
//! - `recon.rs` - Bank credits, payout views and recon links

mod batches;
mod recon;

use crate::db::store::StoreError;
use crate::domain::{Decimal, NewBankTransaction, NewSettlementEvent};
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Collaborator inputs (ingestion pipeline, bank feed importer)
    // =========================================================================

    /// Record an inbound settlement event. Returns its id.
    pub async fn insert_event(&self, event: &NewSettlementEvent) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlement_events (platform, event_type, currency, reference_no, raw_payload, received_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.platform)
        .bind(event.event_type.as_str())
        .bind(event.currency.as_deref())
        .bind(event.reference_no.as_deref())
        .bind(event.raw_payload.to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Record a bank statement credit line. Returns its id.
    pub async fn insert_bank_transaction(
        &self,
        txn: &NewBankTransaction,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO bank_transactions (txn_date, value_date, description, reference_no, credit, currency, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(txn.txn_date.to_string())
        .bind(date_to_sql(txn.value_date))
        .bind(&txn.description)
        .bind(txn.reference_no.as_deref())
        .bind(txn.credit.abs().to_canonical_string())
        .bind(txn.currency.as_deref())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn date_to_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

fn date_from_sql(value: Option<String>, column: &str) -> Option<NaiveDate> {
    let value = value?;
    match NaiveDate::from_str(&value) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(column, value = %value, error = %e, "Failed to parse stored date, treating as null");
            None
        }
    }
}

fn decimal_from_sql(value: &str, column: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or_else(|e| {
        warn!(column, value = %value, error = %e, "Failed to parse stored decimal, using default");
        Decimal::default()
    })
}

fn opt_decimal_from_sql(value: Option<String>, column: &str) -> Option<Decimal> {
    value.map(|v| decimal_from_sql(&v, column))
}

fn opt_decimal_to_sql(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_canonical_string())
}

/// Map a unique-constraint violation to `Conflict`, anything else to `Db`.
fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(message()),
        _ => StoreError::Db(err),
    }
}

/// SQLite busy/locked result codes; extended codes share the low byte.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(false, |code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

/// Map lock contention left over after `busy_timeout` to `Conflict`: another writer
/// holds the rows this call was racing for.
fn conflict_on_busy(err: StoreError, message: impl FnOnce() -> String) -> StoreError {
    match err {
        StoreError::Db(e) if is_busy(&e) => StoreError::Conflict(message()),
        other => other,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::db::store::{ReconStore, SettlementStore, StoreError};
    use crate::domain::EventType;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_insert_and_get_event() {
        let (repo, _temp) = setup_repo().await;
        let id = repo
            .insert_event(&event(EventType::MarketplaceSettlement, Some("REF-1")))
            .await
            .unwrap();

        let stored = repo.get_event(id).await.unwrap().expect("event exists");
        assert_eq!(stored.reference_no.as_deref(), Some("REF-1"));
        assert_eq!(stored.event_type, EventType::MarketplaceSettlement);
        assert_eq!(stored.raw_payload["html"], "<table></table>");
        assert!(repo.get_event(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bank_credit_stored_non_negative() {
        let (repo, _temp) = setup_repo().await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let id = repo
            .insert_bank_transaction(&bank_credit(date, "-1500.25"))
            .await
            .unwrap();

        let txn = repo.get_bank_transaction(id).await.unwrap().unwrap();
        assert_eq!(txn.credit.to_canonical_string(), "1500.25");
        assert!(!txn.is_matched);
        assert_eq!(txn.anchor_date(), date);
    }

    #[test]
    fn test_only_busy_errors_become_conflicts() {
        let passed = super::conflict_on_busy(StoreError::Db(sqlx::Error::RowNotFound), || {
            "racing".to_string()
        });
        assert!(matches!(passed, StoreError::Db(_)));

        let kept = super::conflict_on_busy(StoreError::NotFound("link 1".to_string()), || {
            "racing".to_string()
        });
        assert!(matches!(kept, StoreError::NotFound(_)));
    }
}
