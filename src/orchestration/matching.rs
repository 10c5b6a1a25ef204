//! Payout matching: candidate lookups in both directions and the link state machine.

use crate::auth::{Actor, AuthError, Role};
use crate::db::{ReconStore, StoreError};
use crate::domain::{
    Decimal, EntityType, MatchCandidate, NewReconLink, PayoutSource, ReconLink,
};
use crate::engine::matcher::{amount_score, date_window, rank_bank_credits, rank_payouts, MatchSettings};
use crate::orchestration::posting::{PostOutcome, PostingGate};
use chrono::NaiveDate;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The bank transaction or payout is already matched elsewhere, or the link cannot move.
    #[error("Match conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => MatchError::Conflict(msg),
            StoreError::NotFound(msg) => MatchError::NotFound(msg),
            other => MatchError::Store(other),
        }
    }
}

/// Candidates from one payout source. Sources not integrated yet say so instead of
/// returning an empty list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCandidates {
    pub source: PayoutSource,
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub candidates: Vec<MatchCandidate>,
}

impl SourceCandidates {
    fn unsupported(source: PayoutSource) -> Self {
        SourceCandidates {
            source,
            supported: false,
            message: Some(format!("{} payouts are not yet integrated", source)),
            candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankCandidates {
    pub bank_txn_id: i64,
    pub amount: Decimal,
    pub anchor_date: NaiveDate,
    pub window_from: NaiveDate,
    pub window_to: NaiveDate,
    pub is_matched: bool,
    pub sources: Vec<SourceCandidates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutCandidates {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub amount: Decimal,
    pub payout_date: Option<NaiveDate>,
    pub linked_bank_txn_id: Option<i64>,
    pub candidates: Vec<MatchCandidate>,
}

/// Body of propose and confirm calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub bank_txn_id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    /// Defaults to the amount score of the pair.
    #[serde(default)]
    pub confidence: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub link: ReconLink,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posting: Option<PostOutcome>,
    /// Auto-post failures do not undo the match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posting_error: Option<String>,
}

#[derive(Clone)]
pub struct ReconService {
    store: Arc<dyn ReconStore>,
    settings: MatchSettings,
    auto_post: Option<PostingGate>,
}

impl ReconService {
    pub fn new(store: Arc<dyn ReconStore>, settings: MatchSettings) -> Self {
        Self {
            store,
            settings,
            auto_post: None,
        }
    }

    /// Post a settlement batch through `gate` whenever a link to it is confirmed.
    pub fn with_auto_post(mut self, gate: PostingGate) -> Self {
        self.auto_post = Some(gate);
        self
    }

    /// Payout candidates for one bank credit, one section per payout source.
    pub async fn candidates_for_bank_txn(
        &self,
        bank_txn_id: i64,
    ) -> Result<BankCandidates, MatchError> {
        if bank_txn_id <= 0 {
            return Err(MatchError::Validation("bank transaction id is required".to_string()));
        }
        let bank_txn = self
            .store
            .get_bank_transaction(bank_txn_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("bank transaction {}", bank_txn_id)))?;

        let anchor = bank_txn.anchor_date();
        let (from, to) = date_window(anchor, self.settings.bank_window_days);

        let lookups = PayoutSource::ALL.into_iter().map(|source| {
            let bank_txn = &bank_txn;
            async move {
                if !source.is_integrated() {
                    return Ok::<_, StoreError>(SourceCandidates::unsupported(source));
                }
                let payouts = self.store.list_unmatched_payouts(source, from, to).await?;
                Ok(SourceCandidates {
                    source,
                    supported: true,
                    message: None,
                    candidates: rank_payouts(bank_txn, &payouts, &self.settings),
                })
            }
        });
        let sources = try_join_all(lookups).await?;

        debug!(
            bank_txn_id,
            %from,
            %to,
            found = sources.iter().map(|s| s.candidates.len()).sum::<usize>(),
            "Bank credit candidates"
        );
        Ok(BankCandidates {
            bank_txn_id,
            amount: bank_txn.credit,
            anchor_date: anchor,
            window_from: from,
            window_to: to,
            is_matched: bank_txn.is_matched,
            sources,
        })
    }

    /// Bank credit candidates for one payout. A payout with no date has no window to search.
    pub async fn candidates_for_payout(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<PayoutCandidates, MatchError> {
        validate_entity(entity_type, entity_id)?;
        let payout = self
            .store
            .get_payout(entity_type, entity_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("{} {}", entity_type, entity_id)))?;

        let candidates = match payout.payout_date {
            Some(date) => {
                let (from, to) = date_window(date, self.settings.payout_window_days);
                let credits = self.store.list_unmatched_bank_credits(from, to).await?;
                rank_bank_credits(&payout, &credits, &self.settings)
            }
            None => {
                debug!(%entity_type, entity_id, "Payout has no date, no candidates");
                Vec::new()
            }
        };

        Ok(PayoutCandidates {
            entity_type,
            entity_id,
            amount: payout.amount,
            payout_date: payout.payout_date,
            linked_bank_txn_id: payout.linked_bank_txn_id,
            candidates,
        })
    }

    /// Record a suggested pairing as a candidate link.
    pub async fn propose_match(
        &self,
        request: &MatchRequest,
        actor: &Actor,
    ) -> Result<ReconLink, MatchError> {
        actor.require(Role::FinanceWriter)?;
        let link = self.new_link(request, actor).await?;
        let link = self.store.insert_candidate_link(&link).await?;
        info!(
            link_id = link.id,
            bank_txn_id = link.bank_txn_id,
            entity = %link.entity_type,
            entity_id = link.entity_id,
            "Match proposed"
        );
        Ok(link)
    }

    /// Confirm a pairing. A bank transaction or payout that is already matched is a
    /// `Conflict`, and the existing link is left as it was.
    pub async fn confirm_match(
        &self,
        request: &MatchRequest,
        actor: &Actor,
    ) -> Result<ConfirmOutcome, MatchError> {
        actor.require(Role::FinanceWriter)?;
        let link = self.new_link(request, actor).await?;

        let link = match self.store.confirm_link(&link).await {
            Ok(link) => link,
            Err(StoreError::Conflict(msg)) => {
                warn!(
                    bank_txn_id = request.bank_txn_id,
                    entity_id = request.entity_id,
                    reason = %msg,
                    "Match rejected"
                );
                return Err(MatchError::Conflict(msg));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            link_id = link.id,
            bank_txn_id = link.bank_txn_id,
            entity = %link.entity_type,
            entity_id = link.entity_id,
            actor = %actor.id,
            "Match confirmed"
        );

        let (posting, posting_error) = match &self.auto_post {
            Some(gate) if link.entity_type.event_type().is_some() => {
                match gate.post(link.entity_id, actor).await {
                    Ok(outcome) => (Some(outcome), None),
                    Err(e) => {
                        warn!(batch_id = link.entity_id, error = %e, "Auto-post after match failed");
                        (None, Some(e.to_string()))
                    }
                }
            }
            _ => (None, None),
        };

        Ok(ConfirmOutcome {
            link,
            posting,
            posting_error,
        })
    }

    /// Roll a matched link back. The bank transaction becomes matchable again.
    pub async fn void_link(&self, link_id: i64, actor: &Actor) -> Result<ReconLink, MatchError> {
        actor.require(Role::FinanceWriter)?;
        if link_id <= 0 {
            return Err(MatchError::Validation("link id is required".to_string()));
        }
        let link = self.store.void_link(link_id).await?;
        info!(link_id, bank_txn_id = link.bank_txn_id, actor = %actor.id, "Match voided");
        Ok(link)
    }

    pub async fn get_link(&self, link_id: i64) -> Result<ReconLink, MatchError> {
        if link_id <= 0 {
            return Err(MatchError::Validation("link id is required".to_string()));
        }
        self.store
            .get_link(link_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("recon link {}", link_id)))
    }

    async fn new_link(&self, request: &MatchRequest, actor: &Actor) -> Result<NewReconLink, MatchError> {
        if request.bank_txn_id <= 0 {
            return Err(MatchError::Validation("bank transaction id is required".to_string()));
        }
        validate_entity(request.entity_type, request.entity_id)?;
        if matches!(request.confidence, Some(c) if c > 100) {
            return Err(MatchError::Validation("confidence must be between 0 and 100".to_string()));
        }

        let bank_txn = self
            .store
            .get_bank_transaction(request.bank_txn_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("bank transaction {}", request.bank_txn_id)))?;
        let payout = self
            .store
            .get_payout(request.entity_type, request.entity_id)
            .await?
            .ok_or_else(|| {
                MatchError::NotFound(format!("{} {}", request.entity_type, request.entity_id))
            })?;

        Ok(NewReconLink {
            bank_txn_id: request.bank_txn_id,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            confidence: request
                .confidence
                .unwrap_or_else(|| amount_score(bank_txn.credit, payout.amount)),
            notes: request.notes.clone().filter(|n| !n.trim().is_empty()),
            created_by: actor.id.clone(),
        })
    }
}

fn validate_entity(entity_type: EntityType, entity_id: i64) -> Result<(), MatchError> {
    if !entity_type.is_payout() {
        return Err(MatchError::Validation(format!(
            "{} is not a payout entity",
            entity_type
        )));
    }
    if entity_id <= 0 {
        return Err(MatchError::Validation("entity id is required".to_string()));
    }
    Ok(())
}
