//! Settlement batch manager: document parsing through idempotent batch upsert.

use crate::db::{SettlementStore, StoreError};
use crate::domain::{
    document_text, KeyedSettlementRow, NewSettlementBatch, SettlementBatch, SettlementEvent,
    SettlementRow, UpsertResult,
};
use crate::extract::{parse_document, DocumentMeta};
use crate::normalize::{key_rows, normalize_row, HeaderRules};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Settlement event {0} not found")]
    EventNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of ingesting one settlement event.
///
/// `parsed = false` means the document held no usable table: nothing to import, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub event_id: i64,
    pub parsed: bool,
    pub batch_id: Option<i64>,
    pub attempted_rows: usize,
    pub inserted_rows: usize,
}

impl IngestOutcome {
    fn parse_empty(event_id: i64) -> Self {
        IngestOutcome {
            event_id,
            parsed: false,
            batch_id: None,
            attempted_rows: 0,
            inserted_rows: 0,
        }
    }
}

#[derive(Clone)]
pub struct BatchManager {
    store: Arc<dyn SettlementStore>,
    rules: Arc<HeaderRules>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn SettlementStore>, rules: Arc<HeaderRules>) -> Self {
        Self { store, rules }
    }

    /// Parse an event's document and upsert its batch. Safe to repeat for the same event.
    pub async fn ingest_event(&self, event_id: i64) -> Result<IngestOutcome, IngestError> {
        if event_id <= 0 {
            return Err(IngestError::Validation("event id is required".to_string()));
        }

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(IngestError::EventNotFound(event_id))?;

        let Some(text) = document_text(&event.raw_payload) else {
            info!(event_id, "Settlement payload carries no document text");
            return Ok(IngestOutcome::parse_empty(event_id));
        };

        let doc = parse_document(&self.rules, &text);
        if doc.table.is_empty() {
            info!(event_id, platform = %event.platform, "No settlement table recognised");
            return Ok(IngestOutcome::parse_empty(event_id));
        }

        let rows: Vec<SettlementRow> = doc
            .table
            .body_rows
            .iter()
            .map(|body| normalize_row(&self.rules, &doc.table.header_cells, body))
            .collect();

        let result = self.upsert_batch(&event, &doc.meta, key_rows(rows)).await?;

        Ok(IngestOutcome {
            event_id,
            parsed: true,
            batch_id: Some(result.batch_id),
            attempted_rows: result.attempted_rows,
            inserted_rows: result.inserted_rows,
        })
    }

    /// Upsert the batch for `event` with already normalized rows.
    ///
    /// Atomic in the store; no retry is attempted here.
    pub async fn upsert_batch(
        &self,
        event: &SettlementEvent,
        meta: &DocumentMeta,
        rows: Vec<KeyedSettlementRow>,
    ) -> Result<UpsertResult, IngestError> {
        if event.id <= 0 {
            return Err(IngestError::Validation("event id is required".to_string()));
        }

        let header = batch_header(event, meta, &rows);
        if header.batch_ref.is_none() {
            warn!(event_id = event.id, "Batch has no reference in document or event");
        }

        let result = self.store.upsert_batch(&header, &rows).await?;
        Ok(result)
    }

    pub async fn get_batch(&self, batch_id: i64) -> Result<Option<SettlementBatch>, IngestError> {
        if batch_id <= 0 {
            return Err(IngestError::Validation("batch id is required".to_string()));
        }
        Ok(self.store.get_batch(batch_id).await?)
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Resolve batch header fields: document metadata first, then the event, then the rows.
pub fn batch_header(
    event: &SettlementEvent,
    meta: &DocumentMeta,
    rows: &[KeyedSettlementRow],
) -> NewSettlementBatch {
    let row_dates = rows.iter().filter_map(|r| r.row.txn_date);
    let first_row_date = row_dates.clone().min();
    let last_row_date = row_dates.max();

    let (period_start, period_end) = match (meta.period_start, meta.period_end) {
        (None, None) => (first_row_date, last_row_date),
        period => period,
    };

    NewSettlementBatch {
        event_id: event.id,
        platform: event.platform.clone(),
        event_type: event.event_type.clone(),
        batch_ref: non_blank(meta.batch_ref.as_ref())
            .or_else(|| non_blank(event.reference_no.as_ref())),
        period_start,
        period_end,
        deposit_date: meta.deposit_date.or(last_row_date),
        currency: non_blank(meta.currency.as_ref())
            .or_else(|| non_blank(event.currency.as_ref()))
            .map(|c| c.to_ascii_uppercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{event as test_event, setup_repo};
    use crate::domain::EventType;
    use chrono::NaiveDate;

    fn event(reference_no: Option<&str>, currency: Option<&str>) -> SettlementEvent {
        SettlementEvent {
            id: 3,
            platform: "flipkart".to_string(),
            event_type: EventType::MarketplaceSettlement,
            currency: currency.map(str::to_string),
            reference_no: reference_no.map(str::to_string),
            raw_payload: serde_json::Value::Null,
            received_at_ms: 0,
        }
    }

    fn dated_row(day: u32) -> KeyedSettlementRow {
        KeyedSettlementRow {
            row_key: format!("k{}", day),
            row_index: day as i64,
            row: SettlementRow {
                txn_date: NaiveDate::from_ymd_opt(2024, 6, day),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_document_metadata_wins() {
        let meta = DocumentMeta {
            batch_ref: Some("DOC-1".to_string()),
            currency: Some("usd".to_string()),
            ..Default::default()
        };
        let header = batch_header(&event(Some("EVT-1"), Some("INR")), &meta, &[]);
        assert_eq!(header.batch_ref.as_deref(), Some("DOC-1"));
        assert_eq!(header.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_falls_back_to_event_then_null() {
        let header = batch_header(
            &event(Some("EVT-1"), Some("INR")),
            &DocumentMeta::default(),
            &[],
        );
        assert_eq!(header.batch_ref.as_deref(), Some("EVT-1"));
        assert_eq!(header.currency.as_deref(), Some("INR"));

        let header = batch_header(&event(Some("  "), None), &DocumentMeta::default(), &[]);
        assert_eq!(header.batch_ref, None);
        assert_eq!(header.currency, None);
    }

    #[test]
    fn test_period_and_deposit_from_row_dates() {
        let rows = vec![dated_row(4), dated_row(2), dated_row(6)];
        let header = batch_header(&event(None, None), &DocumentMeta::default(), &rows);
        assert_eq!(header.period_start, NaiveDate::from_ymd_opt(2024, 6, 2));
        assert_eq!(header.period_end, NaiveDate::from_ymd_opt(2024, 6, 6));
        assert_eq!(header.deposit_date, NaiveDate::from_ymd_opt(2024, 6, 6));

        let meta = DocumentMeta {
            period_start: NaiveDate::from_ymd_opt(2024, 5, 27),
            period_end: NaiveDate::from_ymd_opt(2024, 6, 2),
            deposit_date: NaiveDate::from_ymd_opt(2024, 6, 9),
            ..Default::default()
        };
        let header = batch_header(&event(None, None), &meta, &rows);
        assert_eq!(header.period_start, NaiveDate::from_ymd_opt(2024, 5, 27));
        assert_eq!(header.deposit_date, NaiveDate::from_ymd_opt(2024, 6, 9));
    }

    const STATEMENT: &str = r#"
        <html><body><p>Settlement ID: STL-7781</p>
        <table><tr><td>Order ID</td><td>Qty</td><td>Net Amount</td></tr>
        <tr><td>112-233</td><td>2</td><td>&#8377;450.00</td></tr>
        <tr><td>112-234</td><td>1</td><td>&#8377;50.00</td></tr></table>
        </body></html>"#;

    async fn manager_with_event(
        payload: serde_json::Value,
    ) -> (BatchManager, Arc<crate::db::Repository>, i64, tempfile::TempDir) {
        let (repo, temp) = setup_repo().await;
        let mut new_event = test_event(EventType::MarketplaceSettlement, Some("EVT-9"));
        new_event.raw_payload = payload;
        let event_id = repo.insert_event(&new_event).await.unwrap();
        let manager = BatchManager::new(repo.clone(), Arc::new(HeaderRules::builtin()));
        (manager, repo, event_id, temp)
    }

    #[tokio::test]
    async fn test_ingest_twice_inserts_rows_once() {
        let (manager, repo, event_id, _temp) =
            manager_with_event(serde_json::json!({ "html": STATEMENT })).await;

        let first = manager.ingest_event(event_id).await.unwrap();
        assert!(first.parsed);
        assert_eq!(first.attempted_rows, 2);
        assert_eq!(first.inserted_rows, 2);

        let second = manager.ingest_event(event_id).await.unwrap();
        assert_eq!(second.batch_id, first.batch_id);
        assert_eq!(second.inserted_rows, 0);

        let batch_id = first.batch_id.unwrap();
        let batch = manager.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.batch_ref.as_deref(), Some("STL-7781"));
        assert_eq!(batch.row_count, 2);
        assert_eq!(repo.list_rows(batch_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unparsable_document_is_not_an_error() {
        let (manager, _repo, event_id, _temp) =
            manager_with_event(serde_json::json!({ "html": "<p>thanks for selling</p>" })).await;

        let outcome = manager.ingest_event(event_id).await.unwrap();
        assert_eq!(outcome, IngestOutcome::parse_empty(event_id));
    }

    #[tokio::test]
    async fn test_missing_event_and_bad_id() {
        let (manager, _repo, event_id, _temp) = manager_with_event(serde_json::Value::Null).await;

        assert!(matches!(
            manager.ingest_event(0).await,
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            manager.ingest_event(event_id + 10).await,
            Err(IngestError::EventNotFound(_))
        ));
        assert!(!manager.ingest_event(event_id).await.unwrap().parsed);
    }
}
