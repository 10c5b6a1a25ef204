use axum::http::StatusCode;
use settlerecon::api;
use settlerecon::config::Config;
use settlerecon::db::init_db;
use settlerecon::domain::{EventType, LedgerAccount, NewBankTransaction, NewSettlementEvent};
use settlerecon::{Decimal, Repository, SqliteLedger, StaticTokenAuth};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const WRITER: &str = "w-token";
const READER: &str = "r-token";

const STATEMENT: &str = r#"<html><body>
<p>Settlement ID: AMZ-2024-0611</p>
<table>
<tr><th>Order ID</th><th>SKU</th><th>Gross Sales</th><th>Commission Fee</th><th>Net Amount</th></tr>
<tr><td>112-233</td><td>MUG-01</td><td>500.00</td><td>50.00</td><td>450.00</td></tr>
</table></body></html>"#;

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    _temp: TempDir,
}

async fn setup_test_app(posting_accounts: &str) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool.clone()));

    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path);
    env.insert(
        "API_TOKENS".to_string(),
        format!("{}:finance-1:writer,{}:auditor:reader", WRITER, READER),
    );
    env.insert("POSTING_ACCOUNTS".to_string(), posting_accounts.to_string());
    let config = Config::from_env_map(env).unwrap();

    let ledger = SqliteLedger::new(pool);
    let accounts: Vec<LedgerAccount> = config.posting_accounts.accounts().cloned().collect();
    ledger.register_accounts(&accounts).await.unwrap();
    let auth = StaticTokenAuth::new(&config.api_tokens);
    let rules = config.header_rules().unwrap();

    let state = api::AppState::new(repo.clone(), config, Arc::new(ledger), Arc::new(auth), rules);
    TestApp {
        app: api::create_router(state),
        repo,
        _temp: temp_dir,
    }
}

const ALL_ACCOUNTS: &str = "settlement_clearing=1100:Marketplace Clearing,\
commission_expense=6100:Marketplace Commission,sales_revenue=4000:Sales";

async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn seed_event(repo: &Repository, html: &str) -> i64 {
    repo.insert_event(&NewSettlementEvent {
        platform: "amazon".to_string(),
        event_type: EventType::MarketplaceSettlement,
        currency: Some("INR".to_string()),
        reference_no: Some("EVT-1".to_string()),
        raw_payload: json!({ "html": html }),
    })
    .await
    .unwrap()
}

async fn ingested_batch(test: &TestApp) -> i64 {
    let event_id = seed_event(&test.repo, STATEMENT).await;
    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/events/{}/ingest", event_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["batchId"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health_and_ready() {
    let test = setup_test_app(ALL_ACCOUNTS).await;

    let (status, body) = request(&test.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(&test.app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_requests_without_valid_token_are_rejected() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let batch_id = ingested_batch(&test).await;
    let uri = format!("/v1/batches/{}", batch_id);

    let (status, body) = request(&test.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);

    let (status, _) = request(&test.app, "GET", &uri, Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = request(&test.app, "GET", &uri, Some(READER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["id"], batch_id);
}

#[tokio::test]
async fn test_reader_cannot_post() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let batch_id = ingested_batch(&test).await;

    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/batches/{}/post", batch_id),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["ok"], false);

    let (_, body) = request(
        &test.app,
        "GET",
        &format!("/v1/batches/{}", batch_id),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(body["batch"]["postingState"], "unposted");
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let event_id = seed_event(&test.repo, STATEMENT).await;
    let uri = format!("/v1/events/{}/ingest", event_id);

    let (status, first) = request(&test.app, "POST", &uri, Some(WRITER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ok"], true);
    assert_eq!(first["parsed"], true);
    assert_eq!(first["attemptedRows"], 1);
    assert_eq!(first["insertedRows"], 1);

    let (_, second) = request(&test.app, "POST", &uri, Some(WRITER), None).await;
    assert_eq!(second["batchId"], first["batchId"]);
    assert_eq!(second["insertedRows"], 0);

    let (_, batch) = request(
        &test.app,
        "GET",
        &format!("/v1/batches/{}", first["batchId"]),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(batch["batch"]["rowCount"], 1);
    assert_eq!(batch["batch"]["batchRef"], "AMZ-2024-0611");
}

#[tokio::test]
async fn test_unparsable_document_reports_parsed_false() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let event_id = seed_event(&test.repo, "<html><p>Your payout is on its way</p></html>").await;

    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/events/{}/ingest", event_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parsed"], false);
    assert!(body.get("batchId").map_or(true, Value::is_null));
}

#[tokio::test]
async fn test_bad_ids_and_unknown_batches() {
    let test = setup_test_app(ALL_ACCOUNTS).await;

    let (status, body) = request(&test.app, "GET", "/v1/batches/abc", Some(READER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let (status, _) = request(&test.app, "GET", "/v1/batches/999", Some(READER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&test.app, "POST", "/v1/events/999/ingest", Some(WRITER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &test.app,
        "GET",
        "/v1/recon/payouts/courier/1/candidates",
        Some(READER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preview_and_post_twice_return_same_journal() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let batch_id = ingested_batch(&test).await;

    let (status, preview) = request(
        &test.app,
        "GET",
        &format!("/v1/batches/{}/preview", batch_id),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["balanced"], true);
    assert_eq!(preview["totalDebit"].as_f64(), Some(500.0));
    assert_eq!(preview["lines"].as_array().unwrap().len(), 3);

    let uri = format!("/v1/batches/{}/post", batch_id);
    let (status, first) = request(&test.app, "POST", &uri, Some(WRITER), None).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["postingState"], "posted");
    let journal_id = first["journalId"].as_i64().unwrap();
    assert_eq!(first["journalNo"], format!("SJV-{:06}", journal_id));

    let (status, second) = request(&test.app, "POST", &uri, Some(WRITER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["journalId"], journal_id);
    assert_eq!(second["alreadyPosted"], true);
}

#[tokio::test]
async fn test_missing_account_mapping_is_unprocessable() {
    let test = setup_test_app("settlement_clearing=1100:Marketplace Clearing").await;
    let batch_id = ingested_batch(&test).await;

    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/batches/{}/post", batch_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["ok"], false);
    assert_eq!(body["details"]["postingState"], "missing");

    let (_, batch) = request(
        &test.app,
        "GET",
        &format!("/v1/batches/{}", batch_id),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(batch["batch"]["postingState"], "missing");
}

#[tokio::test]
async fn test_exclude_then_post_conflicts() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let batch_id = ingested_batch(&test).await;

    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/batches/{}/exclude", batch_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["postingState"], "excluded");

    let (status, _) = request(
        &test.app,
        "POST",
        &format!("/v1/batches/{}/post", batch_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_bank_candidates_and_confirm_conflict() {
    let test = setup_test_app(ALL_ACCOUNTS).await;
    let batch_id = ingested_batch(&test).await;
    let day = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
    let txn_id = test
        .repo
        .insert_bank_transaction(&NewBankTransaction {
            txn_date: day,
            value_date: None,
            description: "NEFT CR AMAZON SELLER SERVICES".to_string(),
            reference_no: None,
            credit: Decimal::from_str("450.00").unwrap(),
            currency: Some("INR".to_string()),
        })
        .await
        .unwrap();

    // Undated batches never fall inside a window; only the source sections are checked here.
    let (status, body) = request(
        &test.app,
        "GET",
        &format!("/v1/recon/bank/{}/candidates", txn_id),
        Some(READER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 4);
    assert_eq!(sources[2]["source"], "courier");
    assert_eq!(sources[2]["supported"], false);
    assert_eq!(sources[3]["source"], "cod_remittance");
    assert_eq!(sources[3]["supported"], false);

    let confirm = json!({
        "bankTxnId": txn_id,
        "entityType": "marketplace_batch",
        "entityId": batch_id,
        "notes": "manual match",
    });
    let (status, body) =
        request(&test.app, "POST", "/v1/recon/links", Some(WRITER), Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["link"]["status"], "matched");
    assert_eq!(body["link"]["confidence"], 100);
    let link_id = body["link"]["id"].as_i64().unwrap();

    let (status, body) =
        request(&test.app, "POST", "/v1/recon/links", Some(WRITER), Some(confirm)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);

    let (status, body) = request(
        &test.app,
        "POST",
        &format!("/v1/recon/links/{}/void", link_id),
        Some(WRITER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["link"]["status"], "void");
}

#[tokio::test]
async fn test_malformed_match_body_is_bad_request() {
    let test = setup_test_app(ALL_ACCOUNTS).await;

    let (status, body) = request(
        &test.app,
        "POST",
        "/v1/recon/candidates",
        Some(WRITER),
        Some(json!({ "bankTxnId": "seven" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}
