//! Bank credit, payout view and recon link operations for the repository.

use crate::db::store::{ReconStore, StoreError};
use crate::domain::{
    BankTransaction, EntityType, NewReconLink, PayoutEvent, PayoutSource, ReconLink, ReconStatus,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{
    conflict_on_busy, conflict_on_unique, date_from_sql, decimal_from_sql, now_ms, Repository,
};

const LINK_COLUMNS: &str = "id, bank_txn_id, entity_type, entity_id, confidence, status, notes, created_by, updated_at";

fn bank_txn_from_row(row: &SqliteRow) -> Result<BankTransaction, StoreError> {
    let id: i64 = row.get("id");
    let txn_date = date_from_sql(row.get("txn_date"), "txn_date")
        .ok_or_else(|| StoreError::Corrupt(format!("bank transaction {} has no txn_date", id)))?;
    let credit: String = row.get("credit");

    Ok(BankTransaction {
        id,
        txn_date,
        value_date: date_from_sql(row.get("value_date"), "value_date"),
        description: row.get("description"),
        reference_no: row.get("reference_no"),
        credit: decimal_from_sql(&credit, "credit").abs(),
        currency: row.get("currency"),
        is_matched: row.get("is_matched"),
        is_void: row.get("is_void"),
    })
}

/// A batch is a payout only while its net is positive; recoveries and zero batches yield `None`.
fn payout_from_row(
    row: &SqliteRow,
    entity_type: EntityType,
) -> Result<Option<PayoutEvent>, StoreError> {
    let source = entity_type
        .source()
        .ok_or_else(|| StoreError::Corrupt(format!("{} is not a payout entity", entity_type)))?;
    let net_payout: String = row.get("net_payout");
    let amount = decimal_from_sql(&net_payout, "net_payout");
    if !amount.is_positive() {
        return Ok(None);
    }
    let deposit_date = date_from_sql(row.get("deposit_date"), "deposit_date");
    let period_end = date_from_sql(row.get("period_end"), "period_end");

    Ok(Some(PayoutEvent {
        source,
        entity_type,
        entity_id: row.get("id"),
        event_ref: row.get("batch_ref"),
        payout_date: deposit_date.or(period_end),
        amount,
        currency: row.get("currency"),
        status: row.get("posting_state"),
        linked_bank_txn_id: row.get("linked_bank_txn_id"),
    }))
}

fn link_from_row(row: &SqliteRow) -> Result<ReconLink, StoreError> {
    let entity_type: String = row.get("entity_type");
    let status: String = row.get("status");
    let confidence: i64 = row.get("confidence");

    Ok(ReconLink {
        id: row.get("id"),
        bank_txn_id: row.get("bank_txn_id"),
        entity_type: EntityType::from_str(&entity_type).map_err(StoreError::Corrupt)?,
        entity_id: row.get("entity_id"),
        confidence: u32::try_from(confidence).unwrap_or(0),
        status: ReconStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        notes: row.get("notes"),
        created_by: row.get("created_by"),
        updated_at_ms: row.get("updated_at"),
    })
}

async fn fetch_link(
    tx: &mut Transaction<'_, Sqlite>,
    link_id: i64,
) -> Result<ReconLink, StoreError> {
    let sql = format!("SELECT {} FROM recon_links WHERE id = ?", LINK_COLUMNS);
    let row = sqlx::query(&sql).bind(link_id).fetch_one(&mut **tx).await?;
    link_from_row(&row)
}

async fn matched_link_id(
    tx: &mut Transaction<'_, Sqlite>,
    bank_txn_id: i64,
    entity_type: EntityType,
    entity_id: i64,
) -> Result<Option<i64>, StoreError> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM recon_links
        WHERE status = 'matched'
          AND (bank_txn_id = ? OR (entity_type = ? AND entity_id = ?))
        LIMIT 1
        "#,
    )
    .bind(bank_txn_id)
    .bind(entity_type.as_str())
    .bind(entity_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(id)
}

async fn check_bank_txn(
    tx: &mut Transaction<'_, Sqlite>,
    bank_txn_id: i64,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT is_void FROM bank_transactions WHERE id = ?")
        .bind(bank_txn_id)
        .fetch_optional(&mut **tx)
        .await?;
    match row {
        None => Err(StoreError::NotFound(format!("bank transaction {}", bank_txn_id))),
        Some(row) if row.get::<bool, _>("is_void") => Err(StoreError::Conflict(format!(
            "bank transaction {} is void",
            bank_txn_id
        ))),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl ReconStore for Repository {
    async fn get_bank_transaction(&self, id: i64) -> Result<Option<BankTransaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, txn_date, value_date, description, reference_no, credit, currency,
                   is_matched, is_void
            FROM bank_transactions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(bank_txn_from_row).transpose()
    }

    async fn list_unmatched_bank_credits(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BankTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, txn_date, value_date, description, reference_no, credit, currency,
                   is_matched, is_void
            FROM bank_transactions
            WHERE is_matched = 0 AND is_void = 0
              AND COALESCE(value_date, txn_date) BETWEEN ? AND ?
            ORDER BY COALESCE(value_date, txn_date) ASC, id ASC
            "#,
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await?;

        let txns = rows
            .iter()
            .map(bank_txn_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // Credits are compared numerically here; the column is text.
        Ok(txns.into_iter().filter(|t| t.credit.is_positive()).collect())
    }

    async fn list_unmatched_payouts(
        &self,
        source: PayoutSource,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PayoutEvent>, StoreError> {
        let Some(entity_type) = source.entity_type() else {
            return Ok(Vec::new());
        };
        let Some(event_type) = entity_type.event_type() else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT b.id, b.batch_ref, b.deposit_date, b.period_end, b.net_payout, b.currency,
                   b.posting_state, NULL AS linked_bank_txn_id
            FROM settlement_batches b
            WHERE b.event_type = ? AND b.is_void = 0
              AND COALESCE(b.deposit_date, b.period_end) BETWEEN ? AND ?
              AND NOT EXISTS (
                  SELECT 1 FROM recon_links l
                  WHERE l.entity_type = ? AND l.entity_id = b.id AND l.status = 'matched'
              )
            ORDER BY COALESCE(b.deposit_date, b.period_end) ASC, b.id ASC
            "#,
        )
        .bind(event_type.as_str())
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let payouts = rows
            .iter()
            .map(|row| payout_from_row(row, entity_type))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payouts.into_iter().flatten().collect())
    }

    async fn get_payout(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Option<PayoutEvent>, StoreError> {
        let Some(event_type) = entity_type.event_type() else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT b.id, b.batch_ref, b.deposit_date, b.period_end, b.net_payout, b.currency,
                   b.posting_state,
                   (SELECT l.bank_txn_id FROM recon_links l
                    WHERE l.entity_type = ? AND l.entity_id = b.id AND l.status = 'matched')
                       AS linked_bank_txn_id
            FROM settlement_batches b
            WHERE b.id = ? AND b.event_type = ? AND b.is_void = 0
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(event_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => payout_from_row(&row, entity_type),
            None => Ok(None),
        }
    }

    async fn get_link(&self, link_id: i64) -> Result<Option<ReconLink>, StoreError> {
        let sql = format!("SELECT {} FROM recon_links WHERE id = ?", LINK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    async fn insert_candidate_link(&self, link: &NewReconLink) -> Result<ReconLink, StoreError> {
        self.record_candidate(link)
            .await
            .map_err(|e| conflict_on_busy(e, || busy_message(link)))
    }

    async fn confirm_link(&self, link: &NewReconLink) -> Result<ReconLink, StoreError> {
        self.record_match(link)
            .await
            .map_err(|e| conflict_on_busy(e, || busy_message(link)))
    }

    async fn void_link(&self, link_id: i64) -> Result<ReconLink, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE recon_links SET status = 'void', updated_at = ? WHERE id = ? AND status = 'matched'",
        )
        .bind(now_ms())
        .bind(link_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let current = sqlx::query_scalar::<_, String>("SELECT status FROM recon_links WHERE id = ?")
                .bind(link_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("recon link {}", link_id)))?;
            let current = ReconStatus::from_str(&current).map_err(StoreError::Corrupt)?;
            if ReconStatus::can_transition(Some(current), ReconStatus::Void) {
                return Err(StoreError::Conflict(format!(
                    "recon link {} changed concurrently",
                    link_id
                )));
            }
            return Err(StoreError::Conflict(format!(
                "recon link {} is {}, only matched links can be voided",
                link_id, current
            )));
        }

        let stored = fetch_link(&mut tx, link_id).await?;
        let cleared = sqlx::query("UPDATE bank_transactions SET is_matched = 0 WHERE id = ?")
            .bind(stored.bank_txn_id)
            .execute(&mut *tx)
            .await?;
        if cleared.rows_affected() == 0 {
            warn!(link_id, bank_txn_id = stored.bank_txn_id, "Voided link has no bank transaction");
        }
        tx.commit().await?;

        info!(link_id, bank_txn_id = stored.bank_txn_id, "Recon link voided");
        Ok(stored)
    }
}

fn busy_message(link: &NewReconLink) -> String {
    format!(
        "bank transaction {} is being matched concurrently",
        link.bank_txn_id
    )
}

// Each link transaction opens with a write. A deferred SQLite transaction that reads first
// cannot later upgrade a stale snapshot, so a racing writer would surface as a generic
// busy error instead of a conflict.
impl Repository {
    async fn record_candidate(&self, link: &NewReconLink) -> Result<ReconLink, StoreError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let refreshed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE recon_links
            SET confidence = ?, notes = ?, created_by = ?, updated_at = ?
            WHERE bank_txn_id = ? AND entity_type = ? AND entity_id = ? AND status = 'candidate'
            RETURNING id
            "#,
        )
        .bind(i64::from(link.confidence))
        .bind(link.notes.as_deref())
        .bind(&link.created_by)
        .bind(now)
        .bind(link.bank_txn_id)
        .bind(link.entity_type.as_str())
        .bind(link.entity_id)
        .fetch_optional(&mut *tx)
        .await?;

        check_bank_txn(&mut tx, link.bank_txn_id).await?;
        if let Some(existing) =
            matched_link_id(&mut tx, link.bank_txn_id, link.entity_type, link.entity_id).await?
        {
            return Err(StoreError::Conflict(format!(
                "already matched by recon link {}",
                existing
            )));
        }

        let link_id = match refreshed {
            Some(id) => id,
            None => sqlx::query(
                r#"
                INSERT INTO recon_links (
                    bank_txn_id, entity_type, entity_id, confidence, status, notes,
                    created_by, created_at, updated_at
                ) VALUES (?, ?, ?, ?, 'candidate', ?, ?, ?, ?)
                "#,
            )
            .bind(link.bank_txn_id)
            .bind(link.entity_type.as_str())
            .bind(link.entity_id)
            .bind(i64::from(link.confidence))
            .bind(link.notes.as_deref())
            .bind(&link.created_by)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, || "candidate link already exists".to_string()))?
            .last_insert_rowid(),
        };

        let stored = fetch_link(&mut tx, link_id).await?;
        tx.commit().await?;

        debug!(
            link_id,
            bank_txn_id = link.bank_txn_id,
            entity_type = %link.entity_type,
            entity_id = link.entity_id,
            "Candidate recon link recorded"
        );
        Ok(stored)
    }

    async fn record_match(&self, link: &NewReconLink) -> Result<ReconLink, StoreError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let flagged = sqlx::query(
            "UPDATE bank_transactions SET is_matched = 1 WHERE id = ? AND is_matched = 0 AND is_void = 0",
        )
        .bind(link.bank_txn_id)
        .execute(&mut *tx)
        .await?;
        if flagged.rows_affected() == 0 {
            check_bank_txn(&mut tx, link.bank_txn_id).await?;
            return Err(StoreError::Conflict(format!(
                "bank transaction {} is already matched",
                link.bank_txn_id
            )));
        }

        if let Some(existing) =
            matched_link_id(&mut tx, link.bank_txn_id, link.entity_type, link.entity_id).await?
        {
            return Err(StoreError::Conflict(format!(
                "already matched by recon link {}",
                existing
            )));
        }

        let candidate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM recon_links
            WHERE bank_txn_id = ? AND entity_type = ? AND entity_id = ? AND status = 'candidate'
            "#,
        )
        .bind(link.bank_txn_id)
        .bind(link.entity_type.as_str())
        .bind(link.entity_id)
        .fetch_optional(&mut *tx)
        .await?;

        let on_unique = || {
            format!(
                "bank transaction {} or {} {} is already matched",
                link.bank_txn_id, link.entity_type, link.entity_id
            )
        };

        let link_id = match candidate {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE recon_links
                    SET status = 'matched', confidence = ?, notes = COALESCE(?, notes),
                        created_by = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(i64::from(link.confidence))
                .bind(link.notes.as_deref())
                .bind(&link.created_by)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| conflict_on_unique(e, on_unique))?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO recon_links (
                    bank_txn_id, entity_type, entity_id, confidence, status, notes,
                    created_by, created_at, updated_at
                ) VALUES (?, ?, ?, ?, 'matched', ?, ?, ?, ?)
                "#,
            )
            .bind(link.bank_txn_id)
            .bind(link.entity_type.as_str())
            .bind(link.entity_id)
            .bind(i64::from(link.confidence))
            .bind(link.notes.as_deref())
            .bind(&link.created_by)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, on_unique))?
            .last_insert_rowid(),
        };

        // A matched pair leaves no open suggestions on either side.
        let cleared = sqlx::query(
            r#"
            DELETE FROM recon_links
            WHERE status = 'candidate'
              AND (bank_txn_id = ? OR (entity_type = ? AND entity_id = ?))
            "#,
        )
        .bind(link.bank_txn_id)
        .bind(link.entity_type.as_str())
        .bind(link.entity_id)
        .execute(&mut *tx)
        .await?;

        let stored = fetch_link(&mut tx, link_id).await?;
        tx.commit().await?;

        info!(
            link_id,
            bank_txn_id = link.bank_txn_id,
            entity_type = %link.entity_type,
            entity_id = link.entity_id,
            confidence = link.confidence,
            cleared_candidates = cleared.rows_affected(),
            "Recon link matched"
        );
        Ok(stored)
    }
}
