//! Settlement event, batch and row operations for the repository.

use crate::db::store::{AtomicStateTransition, ClaimOutcome, SettlementStore, StoreError};
use crate::domain::{
    Decimal, EventType, KeyedSettlementRow, NewSettlementBatch, PostingState, SettlementBatch,
    SettlementEvent, SettlementRow, UpsertResult,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{
    date_from_sql, date_to_sql, decimal_from_sql, now_ms, opt_decimal_from_sql,
    opt_decimal_to_sql, Repository,
};

const BATCH_SELECT: &str = r#"
    SELECT b.id, b.event_id, b.platform, b.event_type, b.batch_ref, b.period_start,
           b.period_end, b.deposit_date, b.currency, b.net_payout, b.posting_state,
           b.journal_id, b.is_void, b.posted_by, b.created_at,
           (SELECT COUNT(*) FROM settlement_rows r WHERE r.batch_id = b.id) AS row_count
    FROM settlement_batches b
"#;

fn posting_state_from_sql(value: &str) -> Result<PostingState, StoreError> {
    PostingState::from_str(value).map_err(StoreError::Corrupt)
}

fn batch_from_row(row: &SqliteRow) -> Result<SettlementBatch, StoreError> {
    let event_type: String = row.get("event_type");
    let state: String = row.get("posting_state");
    let net_payout: String = row.get("net_payout");

    Ok(SettlementBatch {
        id: row.get("id"),
        event_id: row.get("event_id"),
        platform: row.get("platform"),
        event_type: EventType::from_str(&event_type).unwrap_or(EventType::Other),
        batch_ref: row.get("batch_ref"),
        period_start: date_from_sql(row.get("period_start"), "period_start"),
        period_end: date_from_sql(row.get("period_end"), "period_end"),
        deposit_date: date_from_sql(row.get("deposit_date"), "deposit_date"),
        currency: row.get("currency"),
        net_payout: decimal_from_sql(&net_payout, "net_payout"),
        row_count: row.get("row_count"),
        posting_state: posting_state_from_sql(&state)?,
        journal_id: row.get("journal_id"),
        is_void: row.get("is_void"),
        posted_by: row.get("posted_by"),
        created_at_ms: row.get("created_at"),
    })
}

fn settlement_row_from_row(row: &SqliteRow) -> Result<SettlementRow, StoreError> {
    let raw_columns: String = row.get("raw_columns");
    let raw: BTreeMap<String, String> = serde_json::from_str(&raw_columns)
        .map_err(|e| StoreError::Corrupt(format!("raw_columns: {}", e)))?;

    Ok(SettlementRow {
        txn_date: date_from_sql(row.get("txn_date"), "txn_date"),
        order_id: row.get("order_id"),
        sub_order_id: row.get("sub_order_id"),
        sku: row.get("sku"),
        qty: row.get("qty"),
        gross_sales: opt_decimal_from_sql(row.get("gross_sales"), "gross_sales"),
        net_payout: opt_decimal_from_sql(row.get("net_payout"), "net_payout"),
        shipping_fee: opt_decimal_from_sql(row.get("shipping_fee"), "shipping_fee"),
        commission_fee: opt_decimal_from_sql(row.get("commission_fee"), "commission_fee"),
        fixed_fee: opt_decimal_from_sql(row.get("fixed_fee"), "fixed_fee"),
        closing_fee: opt_decimal_from_sql(row.get("closing_fee"), "closing_fee"),
        total_fees: opt_decimal_from_sql(row.get("total_fees"), "total_fees"),
        refund_amount: opt_decimal_from_sql(row.get("refund_amount"), "refund_amount"),
        other_charges: opt_decimal_from_sql(row.get("other_charges"), "other_charges"),
        settlement_type: row.get("settlement_type"),
        raw,
    })
}

impl Repository {
    /// Rows stored for a batch.
    pub async fn count_rows(&self, batch_id: i64) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM settlement_rows WHERE batch_id = ?")
                .bind(batch_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn batch_state(&self, batch_id: i64) -> Result<Option<(PostingState, bool)>, StoreError> {
        let row = sqlx::query("SELECT posting_state, is_void FROM settlement_batches WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state: String = row.get("posting_state");
                Ok(Some((posting_state_from_sql(&state)?, row.get("is_void"))))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AtomicStateTransition for Repository {
    async fn claim_posting(
        &self,
        batch_id: i64,
        claim: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<ClaimOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET posting_claim = ?, posting_claimed_at = ?, updated_at = ?
            WHERE id = ?
              AND is_void = 0
              AND posting_state IN ('unposted', 'missing')
              AND (posting_claim IS NULL OR posting_claimed_at < ?)
            "#,
        )
        .bind(claim)
        .bind(now_ms)
        .bind(now_ms)
        .bind(batch_id)
        .bind(stale_before_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(batch_id, claim, "Posting claim acquired");
            return match self.get_batch(batch_id).await? {
                Some(batch) => Ok(ClaimOutcome::Claimed(batch)),
                None => Ok(ClaimOutcome::NotFound),
            };
        }

        // The update matched nothing: work out why.
        let Some(batch) = self.get_batch(batch_id).await? else {
            return Ok(ClaimOutcome::NotFound);
        };
        let outcome = if batch.posting_state == PostingState::Posted {
            ClaimOutcome::AlreadyPosted {
                journal_id: batch.journal_id,
            }
        } else if batch.is_void {
            ClaimOutcome::Void
        } else if batch.posting_state.is_postable() {
            ClaimOutcome::InProgress
        } else {
            ClaimOutcome::NotPostable(batch.posting_state)
        };
        Ok(outcome)
    }

    async fn complete_posting(
        &self,
        batch_id: i64,
        claim: &str,
        journal_id: i64,
        actor: &str,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET posting_state = 'posted', journal_id = ?, posted_by = ?, posted_at = ?,
                posting_claim = NULL, posting_claimed_at = NULL, updated_at = ?
            WHERE id = ? AND posting_claim = ? AND posting_state IN ('unposted', 'missing')
            "#,
        )
        .bind(journal_id)
        .bind(actor)
        .bind(now_ms)
        .bind(now_ms)
        .bind(batch_id)
        .bind(claim)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "posting claim on batch {} was lost",
                batch_id
            )));
        }

        info!(batch_id, journal_id, actor, "Batch posted");
        Ok(())
    }

    async fn release_posting(
        &self,
        batch_id: i64,
        claim: &str,
        next_state: Option<PostingState>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET posting_state = COALESCE(?, posting_state),
                posting_claim = NULL, posting_claimed_at = NULL, updated_at = ?
            WHERE id = ? AND posting_claim = ?
            "#,
        )
        .bind(next_state.map(|s| s.as_str()))
        .bind(now_ms())
        .bind(batch_id)
        .bind(claim)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(batch_id, claim, "Posting claim already gone on release");
        } else {
            debug!(batch_id, next_state = ?next_state, "Posting claim released");
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for Repository {
    async fn get_event(&self, event_id: i64) -> Result<Option<SettlementEvent>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, platform, event_type, currency, reference_no, raw_payload, received_at
            FROM settlement_events
            WHERE id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let event_type: String = row.get("event_type");
        let raw_payload: String = row.get("raw_payload");
        let raw_payload = serde_json::from_str(&raw_payload)
            .map_err(|e| StoreError::Corrupt(format!("raw_payload of event {}: {}", event_id, e)))?;

        Ok(Some(SettlementEvent {
            id: row.get("id"),
            platform: row.get("platform"),
            event_type: EventType::from_str(&event_type).unwrap_or(EventType::Other),
            currency: row.get("currency"),
            reference_no: row.get("reference_no"),
            raw_payload,
            received_at_ms: row.get("received_at"),
        }))
    }

    async fn upsert_batch(
        &self,
        batch: &NewSettlementBatch,
        rows: &[KeyedSettlementRow],
    ) -> Result<UpsertResult, StoreError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        // Header metadata is refreshed only while the batch is still open.
        sqlx::query(
            r#"
            INSERT INTO settlement_batches (
                event_id, platform, event_type, batch_ref, period_start, period_end,
                deposit_date, currency, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                platform = excluded.platform,
                event_type = excluded.event_type,
                batch_ref = excluded.batch_ref,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                deposit_date = excluded.deposit_date,
                currency = excluded.currency,
                updated_at = excluded.updated_at
            WHERE settlement_batches.posting_state = 'unposted'
              AND settlement_batches.is_void = 0
              AND settlement_batches.posting_claim IS NULL
            "#,
        )
        .bind(batch.event_id)
        .bind(&batch.platform)
        .bind(batch.event_type.as_str())
        .bind(batch.batch_ref.as_deref())
        .bind(date_to_sql(batch.period_start))
        .bind(date_to_sql(batch.period_end))
        .bind(date_to_sql(batch.deposit_date))
        .bind(batch.currency.as_deref())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let header = sqlx::query(
            "SELECT id, posting_state, posting_claim FROM settlement_batches WHERE event_id = ?",
        )
        .bind(batch.event_id)
        .fetch_one(&mut *tx)
        .await?;
        let batch_id: i64 = header.get("id");
        let state: String = header.get("posting_state");
        let state = posting_state_from_sql(&state)?;
        let claimed: Option<String> = header.get("posting_claim");

        let mut inserted_rows = 0usize;
        for keyed in rows {
            let row = &keyed.row;
            let raw_columns = serde_json::to_string(&row.raw)
                .map_err(|e| StoreError::Corrupt(format!("raw_columns: {}", e)))?;

            let result = sqlx::query(
                r#"
                INSERT INTO settlement_rows (
                    batch_id, row_key, row_index, txn_date, order_id, sub_order_id, sku, qty,
                    gross_sales, net_payout, shipping_fee, commission_fee, fixed_fee,
                    closing_fee, total_fees, refund_amount, other_charges, settlement_type,
                    raw_columns, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(batch_id, row_key) DO NOTHING
                "#,
            )
            .bind(batch_id)
            .bind(&keyed.row_key)
            .bind(keyed.row_index)
            .bind(date_to_sql(row.txn_date))
            .bind(row.order_id.as_deref())
            .bind(row.sub_order_id.as_deref())
            .bind(row.sku.as_deref())
            .bind(row.qty)
            .bind(opt_decimal_to_sql(row.gross_sales))
            .bind(opt_decimal_to_sql(row.net_payout))
            .bind(opt_decimal_to_sql(row.shipping_fee))
            .bind(opt_decimal_to_sql(row.commission_fee))
            .bind(opt_decimal_to_sql(row.fixed_fee))
            .bind(opt_decimal_to_sql(row.closing_fee))
            .bind(opt_decimal_to_sql(row.total_fees))
            .bind(opt_decimal_to_sql(row.refund_amount))
            .bind(opt_decimal_to_sql(row.other_charges))
            .bind(row.settlement_type.as_deref())
            .bind(raw_columns)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted_rows += 1;
            }
        }

        // The payout total follows the rows only while the batch can still be posted.
        if state == PostingState::Unposted && claimed.is_none() {
            let amounts: Vec<Option<String>> = sqlx::query_scalar(
                "SELECT net_payout FROM settlement_rows WHERE batch_id = ?",
            )
            .bind(batch_id)
            .fetch_all(&mut *tx)
            .await?;
            let net_payout: Decimal = amounts
                .iter()
                .flatten()
                .map(|v| decimal_from_sql(v, "net_payout"))
                .sum();

            sqlx::query("UPDATE settlement_batches SET net_payout = ? WHERE id = ?")
                .bind(net_payout.to_canonical_string())
                .bind(batch_id)
                .execute(&mut *tx)
                .await?;
        } else if inserted_rows > 0 {
            warn!(
                batch_id,
                state = %state,
                inserted_rows,
                "New rows stored on a batch that is no longer open; totals left unchanged"
            );
        }

        tx.commit().await?;

        info!(
            batch_id,
            event_id = batch.event_id,
            attempted_rows = rows.len(),
            inserted_rows,
            "Settlement batch upserted"
        );

        Ok(UpsertResult {
            batch_id,
            attempted_rows: rows.len(),
            inserted_rows,
        })
    }

    async fn get_batch(&self, batch_id: i64) -> Result<Option<SettlementBatch>, StoreError> {
        let sql = format!("{} WHERE b.id = ?", BATCH_SELECT);
        let row = sqlx::query(&sql)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn list_rows(&self, batch_id: i64) -> Result<Vec<SettlementRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT txn_date, order_id, sub_order_id, sku, qty, gross_sales, net_payout,
                   shipping_fee, commission_fee, fixed_fee, closing_fee, total_fees,
                   refund_amount, other_charges, settlement_type, raw_columns
            FROM settlement_rows
            WHERE batch_id = ?
            ORDER BY row_index ASC, id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(settlement_row_from_row).collect()
    }

    async fn transition_state(
        &self,
        batch_id: i64,
        from: &[PostingState],
        to: PostingState,
    ) -> Result<bool, StoreError> {
        let Some((current, is_void)) = self.batch_state(batch_id).await? else {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        };
        if is_void || !from.contains(&current) || !current.can_transition_to(to) {
            return Ok(false);
        }

        // Conditioned on the state just read so a concurrent writer wins cleanly.
        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET posting_state = ?, updated_at = ?
            WHERE id = ? AND posting_state = ? AND is_void = 0 AND posting_claim IS NULL
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(batch_id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            info!(batch_id, from = %current, to = %to, "Batch posting state changed");
        }
        Ok(moved)
    }

    async fn void_batch(&self, batch_id: i64) -> Result<bool, StoreError> {
        if self.batch_state(batch_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        }

        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET is_void = 1, updated_at = ?
            WHERE id = ? AND is_void = 0 AND posting_state = 'unposted' AND posting_claim IS NULL
            "#,
        )
        .bind(now_ms())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        let voided = result.rows_affected() == 1;
        if voided {
            info!(batch_id, "Batch voided");
        }
        Ok(voided)
    }
}
