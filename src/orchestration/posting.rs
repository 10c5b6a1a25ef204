//! Ledger posting gate: preview and exactly-once posting of settlement batches.

use crate::auth::{Actor, AuthError, Role};
use crate::db::{ClaimOutcome, SettlementStore, StoreError};
use crate::domain::{PostingRole, PostingState, SettlementBatch};
use crate::engine::posting::{build_preview, journal_request, AccountMap, PostingPreview};
use crate::ledger::{LedgerClient, LedgerError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PostingError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Settlement batch {0} not found")]
    NotFound(i64),
    #[error("Settlement batch {0} is being posted by another request")]
    InProgress(i64),
    #[error("Settlement batch {batch_id} cannot move from {state}")]
    InvalidState { batch_id: i64, state: PostingState },
    #[error("Settlement batch {0} is void")]
    Void(i64),
    /// Business rule rejection; the batch is left in `missing`.
    #[error("No ledger account mapped for {}", roles_list(.roles))]
    MissingAccountMapping { batch_id: i64, roles: Vec<PostingRole> },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn roles_list(roles: &[PostingRole]) -> String {
    roles
        .iter()
        .map(PostingRole::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of a post call. `journal_id = None` means there was nothing to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOutcome {
    pub batch_id: i64,
    pub journal_id: Option<i64>,
    pub journal_no: Option<String>,
    pub posting_state: PostingState,
    pub already_posted: bool,
}

#[derive(Clone)]
pub struct PostingGate {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<dyn LedgerClient>,
    accounts: Arc<AccountMap>,
    lease_ms: i64,
}

impl PostingGate {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: Arc<dyn LedgerClient>,
        accounts: AccountMap,
        lease_secs: i64,
    ) -> Self {
        Self {
            store,
            ledger,
            accounts: Arc::new(accounts),
            lease_ms: lease_secs.saturating_mul(1000),
        }
    }

    async fn load_batch(&self, batch_id: i64) -> Result<SettlementBatch, PostingError> {
        if batch_id <= 0 {
            return Err(PostingError::Validation("batch id is required".to_string()));
        }
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or(PostingError::NotFound(batch_id))
    }

    /// Ledger lines the batch would post. No side effects.
    pub async fn preview(&self, batch_id: i64) -> Result<PostingPreview, PostingError> {
        let batch = self.load_batch(batch_id).await?;
        let rows = self.store.list_rows(batch_id).await?;
        Ok(build_preview(&batch, &rows, &self.accounts))
    }

    /// Post a batch to the ledger exactly once.
    ///
    /// Repeated calls return the journal of the first successful post.
    pub async fn post(&self, batch_id: i64, actor: &Actor) -> Result<PostOutcome, PostingError> {
        if batch_id <= 0 {
            return Err(PostingError::Validation("batch id is required".to_string()));
        }
        actor.require(Role::FinanceWriter)?;

        let claim = Uuid::new_v4().to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let batch = match self
            .store
            .claim_posting(batch_id, &claim, now_ms, now_ms - self.lease_ms)
            .await?
        {
            ClaimOutcome::Claimed(batch) => batch,
            ClaimOutcome::AlreadyPosted { journal_id } => {
                return self.already_posted(batch_id, journal_id).await;
            }
            ClaimOutcome::InProgress => return Err(PostingError::InProgress(batch_id)),
            ClaimOutcome::NotPostable(state) => {
                return Err(PostingError::InvalidState { batch_id, state })
            }
            ClaimOutcome::Void => return Err(PostingError::Void(batch_id)),
            ClaimOutcome::NotFound => return Err(PostingError::NotFound(batch_id)),
        };

        let rows = match self.store.list_rows(batch_id).await {
            Ok(rows) => rows,
            Err(e) => {
                self.release(batch_id, &claim, None).await;
                return Err(e.into());
            }
        };

        let preview = build_preview(&batch, &rows, &self.accounts);
        if preview.is_zero() {
            self.release(batch_id, &claim, None).await;
            info!(batch_id, "Nothing to post");
            return Ok(PostOutcome {
                batch_id,
                journal_id: None,
                journal_no: None,
                posting_state: batch.posting_state,
                already_posted: false,
            });
        }

        let Some(request) = journal_request(&batch, &preview, &actor.id) else {
            let roles = preview.unresolved_roles();
            self.release(batch_id, &claim, Some(PostingState::Missing)).await;
            warn!(batch_id, roles = %roles_list(&roles), "Posting blocked by unmapped accounts");
            return Err(PostingError::MissingAccountMapping { batch_id, roles });
        };

        let journal = match self.ledger.create_journal(&request).await {
            Ok(journal) => journal,
            Err(e) if e.is_business_rule() => {
                self.release(batch_id, &claim, Some(PostingState::Missing)).await;
                warn!(batch_id, error = %e, "Ledger rejected journal");
                return Err(e.into());
            }
            Err(e) => {
                self.release(batch_id, &claim, None).await;
                warn!(batch_id, error = %e, "Ledger call failed, batch left postable");
                return Err(e.into());
            }
        };

        self.store
            .complete_posting(
                batch_id,
                &claim,
                journal.id,
                &actor.id,
                chrono::Utc::now().timestamp_millis(),
            )
            .await?;

        info!(
            batch_id,
            journal_id = journal.id,
            doc_no = %journal.doc_no,
            actor = %actor.id,
            "Settlement batch posted"
        );
        Ok(PostOutcome {
            batch_id,
            journal_id: Some(journal.id),
            journal_no: Some(journal.doc_no),
            posting_state: PostingState::Posted,
            already_posted: false,
        })
    }

    async fn already_posted(
        &self,
        batch_id: i64,
        journal_id: Option<i64>,
    ) -> Result<PostOutcome, PostingError> {
        let journal_no = match journal_id {
            Some(id) => self.ledger.get_journal(id).await?.map(|j| j.doc_no),
            None => None,
        };
        info!(batch_id, ?journal_id, "Batch already posted");
        Ok(PostOutcome {
            batch_id,
            journal_id,
            journal_no,
            posting_state: PostingState::Posted,
            already_posted: true,
        })
    }

    /// Release failures leave the claim to expire; the lease makes the batch postable again.
    async fn release(&self, batch_id: i64, claim: &str, next: Option<PostingState>) {
        if let Err(e) = self.store.release_posting(batch_id, claim, next).await {
            warn!(batch_id, error = %e, "Failed to release posting claim");
        }
    }

    /// Take an unposted or missing batch out of posting for good.
    pub async fn exclude(&self, batch_id: i64, actor: &Actor) -> Result<SettlementBatch, PostingError> {
        actor.require(Role::FinanceWriter)?;
        let batch = self.load_batch(batch_id).await?;
        if batch.is_void {
            return Err(PostingError::Void(batch_id));
        }

        let moved = self
            .store
            .transition_state(
                batch_id,
                &[PostingState::Unposted, PostingState::Missing],
                PostingState::Excluded,
            )
            .await?;
        if !moved {
            // Re-read: a concurrent post may have claimed or completed it.
            let current = self.load_batch(batch_id).await?;
            if current.posting_state.is_postable() {
                return Err(PostingError::InProgress(batch_id));
            }
            return Err(PostingError::InvalidState {
                batch_id,
                state: current.posting_state,
            });
        }

        info!(batch_id, actor = %actor.id, "Batch excluded from posting");
        self.load_batch(batch_id).await
    }

    /// Void an unposted batch. Void batches are skipped by matching and posting.
    pub async fn void(&self, batch_id: i64, actor: &Actor) -> Result<SettlementBatch, PostingError> {
        actor.require(Role::FinanceWriter)?;
        let batch = self.load_batch(batch_id).await?;
        if batch.is_void {
            return Ok(batch);
        }

        if !self.store.void_batch(batch_id).await? {
            let current = self.load_batch(batch_id).await?;
            if current.is_void {
                return Ok(current);
            }
            if current.posting_state == PostingState::Unposted {
                return Err(PostingError::InProgress(batch_id));
            }
            return Err(PostingError::InvalidState {
                batch_id,
                state: current.posting_state,
            });
        }

        info!(batch_id, actor = %actor.id, "Batch voided by operator");
        self.load_batch(batch_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{event, setup_repo};
    use crate::db::Repository;
    use crate::domain::{
        Decimal, EventType, KeyedSettlementRow, NewSettlementBatch, SettlementRow,
    };
    use crate::ledger::MockLedger;
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn writer() -> Actor {
        Actor {
            id: "finance-1".to_string(),
            role: Role::FinanceWriter,
        }
    }

    fn accounts() -> AccountMap {
        AccountMap::new()
            .with(PostingRole::SettlementClearing, 1100, "Marketplace Clearing")
            .with(PostingRole::CommissionExpense, 6100, "Commission")
            .with(PostingRole::SalesRevenue, 4000, "Sales")
    }

    fn row(n: usize, gross: &str, commission: &str, net: &str) -> KeyedSettlementRow {
        let mut raw = BTreeMap::new();
        raw.insert("Order ID".to_string(), format!("ORD-{}", n));
        KeyedSettlementRow {
            row_key: format!("row-{}", n),
            row_index: n as i64,
            row: SettlementRow {
                order_id: Some(format!("ORD-{}", n)),
                gross_sales: Some(Decimal::from_str(gross).unwrap()),
                commission_fee: Some(Decimal::from_str(commission).unwrap()),
                net_payout: Some(Decimal::from_str(net).unwrap()),
                raw,
                ..Default::default()
            },
        }
    }

    async fn seeded_batch(repo: &Repository, rows: &[KeyedSettlementRow]) -> i64 {
        let event_id = repo
            .insert_event(&event(EventType::MarketplaceSettlement, Some("STL-1")))
            .await
            .unwrap();
        let header = NewSettlementBatch {
            event_id,
            platform: "amazon".to_string(),
            event_type: EventType::MarketplaceSettlement,
            batch_ref: Some("STL-1".to_string()),
            period_start: None,
            period_end: None,
            deposit_date: None,
            currency: Some("INR".to_string()),
        };
        repo.upsert_batch(&header, rows).await.unwrap().batch_id
    }

    async fn setup(
        accounts: AccountMap,
        rows: &[KeyedSettlementRow],
    ) -> (PostingGate, Arc<Repository>, Arc<MockLedger>, i64, TempDir) {
        let (repo, temp) = setup_repo().await;
        let batch_id = seeded_batch(&repo, rows).await;
        let ledger = Arc::new(MockLedger::new());
        let gate = PostingGate::new(repo.clone(), ledger.clone(), accounts, 300);
        (gate, repo, ledger, batch_id, temp)
    }

    #[tokio::test]
    async fn test_post_twice_returns_same_journal() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;

        let first = gate.post(batch_id, &writer()).await.unwrap();
        let second = gate.post(batch_id, &writer()).await.unwrap();

        assert_eq!(first.journal_id, second.journal_id);
        assert_eq!(second.journal_no.as_deref(), Some("MOCK-0001"));
        assert!(second.already_posted);
        assert_eq!(ledger.journals().len(), 1);

        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Posted);
        assert_eq!(batch.journal_id, first.journal_id);
        assert_eq!(batch.posted_by.as_deref(), Some("finance-1"));
    }

    #[tokio::test]
    async fn test_journal_balances_and_carries_source_ref() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, _repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;

        gate.post(batch_id, &writer()).await.unwrap();
        let (request, _) = ledger.journals().remove(0);
        assert_eq!(request.source_ref, format!("settlement_batch:{}", batch_id));
        assert_eq!(request.memo, "amazon settlement STL-1");
        let debit: Decimal = request.lines.iter().map(|l| l.debit).sum();
        let credit: Decimal = request.lines.iter().map(|l| l.credit).sum();
        assert_eq!(debit, credit);
        assert_eq!(debit, Decimal::from(500_i64));
    }

    #[tokio::test]
    async fn test_unmapped_role_marks_batch_missing_then_retry_succeeds() {
        let rows = [row(1, "500", "50", "450")];
        let partial = AccountMap::new()
            .with(PostingRole::SettlementClearing, 1100, "Marketplace Clearing")
            .with(PostingRole::SalesRevenue, 4000, "Sales");
        let (gate, repo, ledger, batch_id, _temp) = setup(partial, &rows).await;

        let err = gate.post(batch_id, &writer()).await.unwrap_err();
        match err {
            PostingError::MissingAccountMapping { roles, .. } => {
                assert_eq!(roles, vec![PostingRole::CommissionExpense])
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.create_calls(), 0);
        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Missing);

        let fixed = PostingGate::new(repo.clone(), ledger.clone(), accounts(), 300);
        let outcome = fixed.post(batch_id, &writer()).await.unwrap();
        assert_eq!(outcome.posting_state, PostingState::Posted);
    }

    #[tokio::test]
    async fn test_ledger_outage_leaves_batch_postable() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;
        ledger.set_failure(Some(LedgerError::Unavailable("timeout".to_string())));

        let err = gate.post(batch_id, &writer()).await.unwrap_err();
        assert!(matches!(err, PostingError::Ledger(LedgerError::Unavailable(_))));
        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Unposted);

        ledger.set_failure(None);
        assert!(gate.post(batch_id, &writer()).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_rejection_marks_missing() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;
        ledger.set_failure(Some(LedgerError::Rejected("account 6100 closed".to_string())));

        let err = gate.post(batch_id, &writer()).await.unwrap_err();
        assert!(matches!(err, PostingError::Ledger(LedgerError::Rejected(_))));
        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Missing);
    }

    #[tokio::test]
    async fn test_zero_batch_posts_nothing() {
        let rows = [row(1, "0", "0", "0")];
        let (gate, repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;

        let outcome = gate.post(batch_id, &writer()).await.unwrap();
        assert_eq!(outcome.journal_id, None);
        assert_eq!(outcome.posting_state, PostingState::Unposted);
        assert_eq!(ledger.create_calls(), 0);
        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Unposted);
    }

    #[tokio::test]
    async fn test_reader_cannot_post() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, _repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;
        let reader = Actor {
            id: "auditor".to_string(),
            role: Role::FinanceReader,
        };

        let err = gate.post(batch_id, &reader).await.unwrap_err();
        assert!(matches!(err, PostingError::Auth(AuthError::Forbidden { .. })));
        assert_eq!(ledger.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_excluded_and_void_batches_are_not_posted() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, repo, _ledger, batch_id, _temp) = setup(accounts(), &rows).await;

        let excluded = gate.exclude(batch_id, &writer()).await.unwrap();
        assert_eq!(excluded.posting_state, PostingState::Excluded);
        assert!(matches!(
            gate.post(batch_id, &writer()).await,
            Err(PostingError::InvalidState {
                state: PostingState::Excluded,
                ..
            })
        ));

        let other = seeded_batch(&repo, &rows).await;
        let voided = gate.void(other, &writer()).await.unwrap();
        assert!(voided.is_void);
        assert!(matches!(
            gate.post(other, &writer()).await,
            Err(PostingError::Void(_))
        ));
    }

    #[tokio::test]
    async fn test_preview_of_unknown_batch() {
        let (gate, _repo, _ledger, batch_id, _temp) = setup(accounts(), &[]).await;
        assert!(matches!(
            gate.preview(batch_id + 1).await,
            Err(PostingError::NotFound(_))
        ));
        assert!(gate.preview(batch_id).await.unwrap().is_zero());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_posts_create_one_journal() {
        let rows = [row(1, "500", "50", "450")];
        let (gate, repo, ledger, batch_id, _temp) = setup(accounts(), &rows).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.post(batch_id, &writer()).await })
            })
            .collect();

        let mut fresh = Vec::new();
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                Ok(outcome) if outcome.already_posted => {
                    assert_eq!(outcome.posting_state, PostingState::Posted);
                }
                Ok(outcome) => fresh.push(outcome.journal_id),
                Err(PostingError::InProgress(id)) => assert_eq!(id, batch_id),
                Err(other) => panic!("unexpected posting error: {}", other),
            }
        }

        assert_eq!(fresh.len(), 1);
        assert_eq!(ledger.journals().len(), 1);
        let batch = repo.get_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.posting_state, PostingState::Posted);
        assert_eq!(batch.journal_id, fresh[0]);
    }
}
