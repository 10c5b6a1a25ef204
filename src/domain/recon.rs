//! Recon links between bank credits and payouts, and match candidates.

use crate::domain::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Link status. Valid moves: (none) -> candidate, (none) | candidate -> matched, matched -> void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconStatus {
    Candidate,
    Matched,
    Void,
}

impl ReconStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconStatus::Candidate => "candidate",
            ReconStatus::Matched => "matched",
            ReconStatus::Void => "void",
        }
    }

    /// Whether a link may move from `from` (None = no link yet) to `to`.
    pub fn can_transition(from: Option<ReconStatus>, to: ReconStatus) -> bool {
        matches!(
            (from, to),
            (None, ReconStatus::Candidate)
                | (None, ReconStatus::Matched)
                | (Some(ReconStatus::Candidate), ReconStatus::Matched)
                | (Some(ReconStatus::Matched), ReconStatus::Void)
        )
    }
}

impl FromStr for ReconStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(ReconStatus::Candidate),
            "matched" => Ok(ReconStatus::Matched),
            "void" => Ok(ReconStatus::Void),
            other => Err(format!("unknown recon status: {}", other)),
        }
    }
}

impl fmt::Display for ReconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Association between one bank transaction and one payout-bearing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconLink {
    pub id: i64,
    pub bank_txn_id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub confidence: u32,
    pub status: ReconStatus,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReconLink {
    pub bank_txn_id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub confidence: u32,
    pub notes: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    #[serde(rename = "Amount match")]
    AmountMatch,
    #[serde(rename = "Near amount match")]
    NearAmountMatch,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::AmountMatch => f.write_str("Amount match"),
            MatchReason::NearAmountMatch => f.write_str("Near amount match"),
        }
    }
}

/// A scored suggestion pairing an anchor with one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub score: u32,
    pub reason: MatchReason,
}
