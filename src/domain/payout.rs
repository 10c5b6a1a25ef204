//! Source-agnostic payout view used for matching.

use crate::domain::{Decimal, EventType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a payout claim comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutSource {
    Marketplace,
    Gateway,
    Courier,
    CodRemittance,
}

impl PayoutSource {
    pub const ALL: [PayoutSource; 4] = [
        PayoutSource::Marketplace,
        PayoutSource::Gateway,
        PayoutSource::Courier,
        PayoutSource::CodRemittance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutSource::Marketplace => "marketplace",
            PayoutSource::Gateway => "gateway",
            PayoutSource::Courier => "courier",
            PayoutSource::CodRemittance => "cod_remittance",
        }
    }

    /// Entity type backing this source, None when the source is not integrated yet.
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            PayoutSource::Marketplace => Some(EntityType::MarketplaceBatch),
            PayoutSource::Gateway => Some(EntityType::GatewaySettlement),
            PayoutSource::Courier | PayoutSource::CodRemittance => None,
        }
    }

    pub fn is_integrated(&self) -> bool {
        self.entity_type().is_some()
    }
}

impl fmt::Display for PayoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a recon link or match candidate points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    MarketplaceBatch,
    GatewaySettlement,
    BankTransaction,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::MarketplaceBatch => "marketplace_batch",
            EntityType::GatewaySettlement => "gateway_settlement",
            EntityType::BankTransaction => "bank_transaction",
        }
    }

    /// True for entities that carry a payout (the non-bank side of a link).
    pub fn is_payout(&self) -> bool {
        !matches!(self, EntityType::BankTransaction)
    }

    /// Settlement event type whose batches back this entity type.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            EntityType::MarketplaceBatch => Some(EventType::MarketplaceSettlement),
            EntityType::GatewaySettlement => Some(EventType::GatewaySettlement),
            EntityType::BankTransaction => None,
        }
    }

    pub fn source(&self) -> Option<PayoutSource> {
        match self {
            EntityType::MarketplaceBatch => Some(PayoutSource::Marketplace),
            EntityType::GatewaySettlement => Some(PayoutSource::Gateway),
            EntityType::BankTransaction => None,
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marketplace_batch" => Ok(EntityType::MarketplaceBatch),
            "gateway_settlement" => Ok(EntityType::GatewaySettlement),
            "bank_transaction" => Ok(EntityType::BankTransaction),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Money a marketplace or gateway says it paid out. Derived from settlement batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutEvent {
    pub source: PayoutSource,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub event_ref: Option<String>,
    pub payout_date: Option<NaiveDate>,
    /// Always non-negative.
    pub amount: Decimal,
    pub currency: Option<String>,
    pub status: String,
    pub linked_bank_txn_id: Option<i64>,
}
