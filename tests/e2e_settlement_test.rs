use chrono::NaiveDate;
use serde_json::json;
use settlerecon::auth::{Actor, Role};
use settlerecon::db::{init_db, SettlementStore};
use settlerecon::domain::{
    EntityType, EventType, MatchReason, NewBankTransaction, NewSettlementEvent, PostingRole,
};
use settlerecon::engine::{AccountMap, MatchSettings};
use settlerecon::ledger::MockLedger;
use settlerecon::normalize::HeaderRules;
use settlerecon::orchestration::{BatchManager, MatchRequest, PostingGate, ReconService};
use settlerecon::{Decimal, PostingState, ReconStatus, Repository};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

/// Unclosed cells, a layout table and a script-injected decoy table.
const MALFORMED_STATEMENT: &str = r#"
<html><body>
<div>Settlement ID: AMZ-77 <b>Settlement Period: 01/06/2024 - 07/06/2024</div>
<table class="layout"><tr><td>Hello seller<td>Welcome</table>
<table>
  <tr><th>Order ID</th><th>Qty<th>Net Amount</tr>
  <tr><td>112-233<td>2<td>&#8377;450.00
</table>
<script>document.write('<table><tr><td>Order ID</td><td>SKU</td><td>Qty</td><td>Fee</td></tr></table>')</script>
"#;

struct Harness {
    repo: Arc<Repository>,
    ledger: Arc<MockLedger>,
    batches: BatchManager,
    gate: PostingGate,
    recon: ReconService,
    _temp: TempDir,
}

async fn setup() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let ledger = Arc::new(MockLedger::new());

    let accounts = AccountMap::new()
        .with(PostingRole::SettlementClearing, 1100, "Marketplace Clearing")
        .with(PostingRole::SalesRevenue, 4000, "Sales");
    let batches = BatchManager::new(repo.clone(), Arc::new(HeaderRules::builtin()));
    let gate = PostingGate::new(repo.clone(), ledger.clone(), accounts, 300);
    let recon = ReconService::new(repo.clone(), MatchSettings::default());

    Harness {
        repo,
        ledger,
        batches,
        gate,
        recon,
        _temp: temp_dir,
    }
}

fn writer() -> Actor {
    Actor {
        id: "finance-1".to_string(),
        role: Role::FinanceWriter,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

#[tokio::test]
async fn test_malformed_statement_through_post_and_match() {
    let h = setup().await;
    let event_id = h
        .repo
        .insert_event(&NewSettlementEvent {
            platform: "amazon".to_string(),
            event_type: EventType::MarketplaceSettlement,
            currency: Some("INR".to_string()),
            reference_no: None,
            raw_payload: json!({ "body_html": MALFORMED_STATEMENT }),
        })
        .await
        .unwrap();

    // Ingest: one row, with only the three mapped fields populated.
    let outcome = h.batches.ingest_event(event_id).await.unwrap();
    assert!(outcome.parsed);
    assert_eq!(outcome.inserted_rows, 1);
    let batch_id = outcome.batch_id.unwrap();

    let rows = h.repo.list_rows(batch_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.order_id.as_deref(), Some("112-233"));
    assert_eq!(row.qty, Some(2));
    assert_eq!(row.net_payout, Some(Decimal::from_str("450.00").unwrap()));
    assert_eq!(row.gross_sales, None);
    assert_eq!(row.sku, None);
    assert_eq!(row.txn_date, None);
    assert_eq!(row.raw.len(), 3);

    let batch = h.batches.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.batch_ref.as_deref(), Some("AMZ-77"));
    assert_eq!(batch.period_start, Some(day(1)));
    assert_eq!(batch.period_end, Some(day(7)));
    assert_eq!(batch.currency.as_deref(), Some("INR"));
    assert_eq!(batch.net_payout, Decimal::from(450_i64));

    // Re-delivery of the same event changes nothing.
    let again = h.batches.ingest_event(event_id).await.unwrap();
    assert_eq!(again.inserted_rows, 0);
    assert_eq!(h.repo.list_rows(batch_id).await.unwrap().len(), 1);

    // Preview then post twice.
    let preview = h.gate.preview(batch_id).await.unwrap();
    assert!(preview.is_balanced());
    assert_eq!(preview.total_debit, Decimal::from(450_i64));
    assert!(preview.unresolved_roles().is_empty());

    let first = h.gate.post(batch_id, &writer()).await.unwrap();
    let second = h.gate.post(batch_id, &writer()).await.unwrap();
    assert_eq!(first.journal_id, second.journal_id);
    assert_eq!(second.posting_state, PostingState::Posted);
    assert_eq!(h.ledger.journals().len(), 1);

    // The payout is dated by its period end; a credit three days later matches exactly.
    let exact = h
        .repo
        .insert_bank_transaction(&NewBankTransaction {
            txn_date: day(10),
            value_date: None,
            description: "NEFT CR AMAZON".to_string(),
            reference_no: Some("UTR123".to_string()),
            credit: Decimal::from_str("450.00").unwrap(),
            currency: Some("INR".to_string()),
        })
        .await
        .unwrap();

    let found = h.recon.candidates_for_bank_txn(exact).await.unwrap();
    let marketplace = &found.sources[0];
    assert_eq!(marketplace.candidates.len(), 1);
    assert_eq!(marketplace.candidates[0].entity_id, batch_id);
    assert_eq!(marketplace.candidates[0].score, 100);
    assert_eq!(marketplace.candidates[0].reason, MatchReason::AmountMatch);

    let payout_side = h
        .recon
        .candidates_for_payout(EntityType::MarketplaceBatch, batch_id)
        .await
        .unwrap();
    assert_eq!(payout_side.candidates[0].entity_id, exact);

    let request = MatchRequest {
        bank_txn_id: exact,
        entity_type: EntityType::MarketplaceBatch,
        entity_id: batch_id,
        confidence: None,
        notes: Some("statement line 4".to_string()),
    };
    let confirmed = h.recon.confirm_match(&request, &writer()).await.unwrap();
    assert_eq!(confirmed.link.status, ReconStatus::Matched);
    assert_eq!(confirmed.link.created_by.as_deref(), Some("finance-1"));

    // Matched on both sides: neither shows up as a candidate any more.
    let found = h.recon.candidates_for_bank_txn(exact).await.unwrap();
    assert!(found.is_matched);
    assert!(found.sources[0].candidates.is_empty());
    let payout_side = h
        .recon
        .candidates_for_payout(EntityType::MarketplaceBatch, batch_id)
        .await
        .unwrap();
    assert_eq!(payout_side.linked_bank_txn_id, Some(exact));
    assert!(payout_side.candidates.is_empty());
}

#[tokio::test]
async fn test_delimited_gateway_export_is_ingested() {
    let h = setup().await;
    let csv = "Transaction Date,Order ID,Gross Amount,Fee,Net Settled\n\
               05/06/24,pay_001,\"1,000.00\",20.00,980.00\n\
               06/06/24,pay_002,500.00,10.00,490.00\n";
    let event_id = h
        .repo
        .insert_event(&NewSettlementEvent {
            platform: "razorpay".to_string(),
            event_type: EventType::GatewaySettlement,
            currency: Some("INR".to_string()),
            reference_no: Some("setl_9".to_string()),
            raw_payload: json!(csv),
        })
        .await
        .unwrap();

    let outcome = h.batches.ingest_event(event_id).await.unwrap();
    assert!(outcome.parsed);
    assert_eq!(outcome.inserted_rows, 2);

    let batch = h.batches.get_batch(outcome.batch_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(batch.batch_ref.as_deref(), Some("setl_9"));
    assert_eq!(batch.event_type, EventType::GatewaySettlement);
    assert_eq!(batch.period_start, Some(day(5)));
    assert_eq!(batch.deposit_date, Some(day(6)));
    assert_eq!(batch.net_payout, Decimal::from(1470_i64));
}
