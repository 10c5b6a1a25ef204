//! Persistence capabilities the reconciliation core depends on.
//!
//! The core never assumes a particular database. It relies on these traits, and on the
//! uniqueness and check-and-set guarantees they document, for idempotent batch upserts,
//! exactly-once posting and one matched link per bank transaction.

use crate::domain::{
    BankTransaction, EntityType, KeyedSettlementRow, NewReconLink, NewSettlementBatch,
    PayoutEvent, PayoutSource, PostingState, ReconLink, SettlementBatch, SettlementEvent,
    SettlementRow, UpsertResult,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or state guarantee rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A stored value could not be read back into its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Result of trying to take the posting claim on a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller holds the claim; the batch is returned as of the claim.
    Claimed(SettlementBatch),
    AlreadyPosted { journal_id: Option<i64> },
    /// Another caller holds a live claim.
    InProgress,
    NotPostable(PostingState),
    Void,
    NotFound,
}

/// Atomic check-and-set over a batch's posting state.
///
/// Implementations must make `claim_posting` a single conditional update, so that two
/// service instances racing on the same batch cannot both obtain the claim.
#[async_trait]
pub trait AtomicStateTransition: Send + Sync {
    /// Claim a postable batch. A claim older than `stale_before_ms` may be taken over.
    async fn claim_posting(
        &self,
        batch_id: i64,
        claim: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Mark the claimed batch posted with its journal. Fails with `Conflict` if the claim
    /// was lost.
    async fn complete_posting(
        &self,
        batch_id: i64,
        claim: &str,
        journal_id: i64,
        actor: &str,
        now_ms: i64,
    ) -> Result<(), StoreError>;

    /// Drop the claim, optionally moving the batch to `next_state`.
    async fn release_posting(
        &self,
        batch_id: i64,
        claim: &str,
        next_state: Option<PostingState>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettlementStore: AtomicStateTransition {
    async fn get_event(&self, event_id: i64) -> Result<Option<SettlementEvent>, StoreError>;

    /// Create or refresh the batch for `batch.event_id` and insert rows not yet present.
    ///
    /// Atomic: either the header and every new row become visible, or nothing does.
    async fn upsert_batch(
        &self,
        batch: &NewSettlementBatch,
        rows: &[KeyedSettlementRow],
    ) -> Result<UpsertResult, StoreError>;

    async fn get_batch(&self, batch_id: i64) -> Result<Option<SettlementBatch>, StoreError>;

    /// Rows in document order.
    async fn list_rows(&self, batch_id: i64) -> Result<Vec<SettlementRow>, StoreError>;

    /// Move an unclaimed batch from one of `from` to `to`. Returns false when the batch
    /// was not in an allowed state.
    async fn transition_state(
        &self,
        batch_id: i64,
        from: &[PostingState],
        to: PostingState,
    ) -> Result<bool, StoreError>;

    /// Flag an unposted, unclaimed batch void. Returns false otherwise.
    async fn void_batch(&self, batch_id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ReconStore: Send + Sync {
    async fn get_bank_transaction(&self, id: i64) -> Result<Option<BankTransaction>, StoreError>;

    /// Unmatched, non-void bank credits whose anchor date falls in `[from, to]`.
    async fn list_unmatched_bank_credits(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BankTransaction>, StoreError>;

    /// Unmatched, non-void payouts of one integrated source dated in `[from, to]`.
    async fn list_unmatched_payouts(
        &self,
        source: PayoutSource,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PayoutEvent>, StoreError>;

    async fn get_payout(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Option<PayoutEvent>, StoreError>;

    async fn get_link(&self, link_id: i64) -> Result<Option<ReconLink>, StoreError>;

    /// Record (or refresh) a candidate link. `Conflict` when either side is already matched.
    async fn insert_candidate_link(&self, link: &NewReconLink) -> Result<ReconLink, StoreError>;

    /// Create or promote the matched link and flag the bank transaction matched.
    ///
    /// `Conflict` when the bank transaction or the entity already has a matched link; the
    /// existing link is left untouched.
    async fn confirm_link(&self, link: &NewReconLink) -> Result<ReconLink, StoreError>;

    /// Roll a matched link back to void and clear the bank transaction's matched flag.
    async fn void_link(&self, link_id: i64) -> Result<ReconLink, StoreError>;
}
