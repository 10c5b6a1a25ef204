//! SQLite-backed general ledger.

use super::{validate_request, LedgerClient, LedgerError};
use crate::domain::{Decimal, JournalLine, JournalRef, JournalRequest, LedgerAccount};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Journals stored alongside the settlement tables.
///
/// Refuses lines against accounts missing from `ledger_accounts`.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteLedger { pool }
    }

    /// Create or rename chart-of-accounts entries.
    pub async fn register_accounts(&self, accounts: &[LedgerAccount]) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        for account in accounts {
            sqlx::query(
                "INSERT INTO ledger_accounts (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            )
            .bind(account.account_id)
            .bind(&account.account_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = accounts.len(), "Ledger accounts registered");
        Ok(())
    }

    /// Lines of a stored journal, in insertion order.
    pub async fn journal_lines(&self, journal_id: i64) -> Result<Vec<JournalLine>, LedgerError> {
        let rows = sqlx::query(
            "SELECT account_id, debit, credit FROM journal_lines WHERE journal_id = ? ORDER BY id",
        )
        .bind(journal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let debit: String = row.get("debit");
                let credit: String = row.get("credit");
                Ok(JournalLine {
                    account_id: row.get("account_id"),
                    debit: Decimal::from_str(&debit)
                        .map_err(|e| LedgerError::Unavailable(format!("stored debit: {}", e)))?,
                    credit: Decimal::from_str(&credit)
                        .map_err(|e| LedgerError::Unavailable(format!("stored credit: {}", e)))?,
                })
            })
            .collect()
    }

    async fn find_by_source_ref(&self, source_ref: &str) -> Result<Option<JournalRef>, LedgerError> {
        let row = sqlx::query("SELECT id, doc_no FROM journals WHERE source_ref = ?")
            .bind(source_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| JournalRef {
            id: row.get("id"),
            doc_no: row.get::<Option<String>, _>("doc_no").unwrap_or_default(),
        }))
    }
}

fn doc_no(journal_id: i64) -> String {
    format!("SJV-{:06}", journal_id)
}

#[async_trait]
impl LedgerClient for SqliteLedger {
    async fn create_journal(&self, request: &JournalRequest) -> Result<JournalRef, LedgerError> {
        validate_request(request)?;

        if let Some(existing) = self.find_by_source_ref(&request.source_ref).await? {
            debug!(source_ref = %request.source_ref, journal_id = existing.id, "Journal already exists");
            return Ok(existing);
        }

        let mut tx = self.pool.begin().await?;

        for line in &request.lines {
            let known: Option<i64> = sqlx::query_scalar("SELECT id FROM ledger_accounts WHERE id = ?")
                .bind(line.account_id)
                .fetch_optional(&mut *tx)
                .await?;
            if known.is_none() {
                return Err(LedgerError::Rejected(format!(
                    "unknown ledger account {}",
                    line.account_id
                )));
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO journals (source_ref, memo, created_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&request.source_ref)
        .bind(&request.memo)
        .bind(&request.created_by)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await;

        let journal_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Lost a race with a concurrent request for the same source.
                drop(tx);
                warn!(source_ref = %request.source_ref, "Concurrent journal creation, returning existing");
                return self
                    .find_by_source_ref(&request.source_ref)
                    .await?
                    .ok_or_else(|| LedgerError::Unavailable("journal vanished".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let doc_no = doc_no(journal_id);
        sqlx::query("UPDATE journals SET doc_no = ? WHERE id = ?")
            .bind(&doc_no)
            .bind(journal_id)
            .execute(&mut *tx)
            .await?;

        for line in &request.lines {
            sqlx::query(
                "INSERT INTO journal_lines (journal_id, account_id, debit, credit) VALUES (?, ?, ?, ?)",
            )
            .bind(journal_id)
            .bind(line.account_id)
            .bind(line.debit.to_canonical_string())
            .bind(line.credit.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            journal_id,
            doc_no = %doc_no,
            source_ref = %request.source_ref,
            lines = request.lines.len(),
            "Journal created"
        );
        Ok(JournalRef {
            id: journal_id,
            doc_no,
        })
    }

    async fn get_journal(&self, journal_id: i64) -> Result<Option<JournalRef>, LedgerError> {
        let row = sqlx::query("SELECT id, doc_no FROM journals WHERE id = ?")
            .bind(journal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| JournalRef {
            id: row.get("id"),
            doc_no: row.get::<Option<String>, _>("doc_no").unwrap_or_default(),
        }))
    }
}
