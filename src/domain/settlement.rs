//! Settlement events, batches and line items.

use crate::domain::Decimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of inbound settlement payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MarketplaceSettlement,
    GatewaySettlement,
    BankCredit,
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MarketplaceSettlement => "MARKETPLACE_SETTLEMENT",
            EventType::GatewaySettlement => "GATEWAY_SETTLEMENT",
            EventType::BankCredit => "BANK_CREDIT",
            EventType::Other => "OTHER",
        }
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "MARKETPLACE_SETTLEMENT" => EventType::MarketplaceSettlement,
            "GATEWAY_SETTLEMENT" => EventType::GatewaySettlement,
            "BANK_CREDIT" => EventType::BankCredit,
            _ => EventType::Other,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw inbound settlement payload. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub id: i64,
    pub platform: String,
    pub event_type: EventType,
    pub currency: Option<String>,
    pub reference_no: Option<String>,
    pub raw_payload: serde_json::Value,
    pub received_at_ms: i64,
}

/// Fields the ingestion pipeline supplies when recording an event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSettlementEvent {
    pub platform: String,
    pub event_type: EventType,
    pub currency: Option<String>,
    pub reference_no: Option<String>,
    pub raw_payload: serde_json::Value,
}

/// Ledger posting state of a batch.
///
/// Moves forward only: `unposted -> missing -> posted`, and `unposted | missing -> excluded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingState {
    Unposted,
    Posted,
    Missing,
    Excluded,
}

impl PostingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingState::Unposted => "unposted",
            PostingState::Posted => "posted",
            PostingState::Missing => "missing",
            PostingState::Excluded => "excluded",
        }
    }

    pub fn can_transition_to(&self, next: PostingState) -> bool {
        matches!(
            (self, next),
            (PostingState::Unposted, PostingState::Posted)
                | (PostingState::Unposted, PostingState::Missing)
                | (PostingState::Unposted, PostingState::Excluded)
                | (PostingState::Missing, PostingState::Posted)
                | (PostingState::Missing, PostingState::Excluded)
        )
    }

    /// States from which a post may still be attempted.
    pub fn is_postable(&self) -> bool {
        matches!(self, PostingState::Unposted | PostingState::Missing)
    }
}

impl FromStr for PostingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unposted" => Ok(PostingState::Unposted),
            "posted" => Ok(PostingState::Posted),
            "missing" => Ok(PostingState::Missing),
            "excluded" => Ok(PostingState::Excluded),
            other => Err(format!("unknown posting state: {}", other)),
        }
    }
}

impl fmt::Display for PostingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized unit of work derived from one settlement event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBatch {
    pub id: i64,
    pub event_id: i64,
    pub platform: String,
    pub event_type: EventType,
    pub batch_ref: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub deposit_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub net_payout: Decimal,
    pub row_count: i64,
    pub posting_state: PostingState,
    pub journal_id: Option<i64>,
    pub is_void: bool,
    pub posted_by: Option<String>,
    pub created_at_ms: i64,
}

/// Batch header fields resolved by the batch manager before upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSettlementBatch {
    pub event_id: i64,
    pub platform: String,
    pub event_type: EventType,
    pub batch_ref: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub deposit_date: Option<NaiveDate>,
    pub currency: Option<String>,
}

/// One normalized settlement line item.
///
/// `raw` keeps the original header -> cell text for every column, mapped or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRow {
    pub txn_date: Option<NaiveDate>,
    pub order_id: Option<String>,
    pub sub_order_id: Option<String>,
    pub sku: Option<String>,
    pub qty: Option<i64>,
    pub gross_sales: Option<Decimal>,
    pub net_payout: Option<Decimal>,
    pub shipping_fee: Option<Decimal>,
    pub commission_fee: Option<Decimal>,
    pub fixed_fee: Option<Decimal>,
    pub closing_fee: Option<Decimal>,
    pub total_fees: Option<Decimal>,
    pub refund_amount: Option<Decimal>,
    pub other_charges: Option<Decimal>,
    pub settlement_type: Option<String>,
    pub raw: BTreeMap<String, String>,
}

/// A normalized row paired with its natural key inside the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedSettlementRow {
    pub row_key: String,
    pub row_index: i64,
    pub row: SettlementRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub batch_id: i64,
    pub attempted_rows: usize,
    pub inserted_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_state_moves_forward_only() {
        assert!(PostingState::Unposted.can_transition_to(PostingState::Posted));
        assert!(PostingState::Missing.can_transition_to(PostingState::Posted));
        assert!(!PostingState::Posted.can_transition_to(PostingState::Unposted));
        assert!(!PostingState::Posted.can_transition_to(PostingState::Missing));
        assert!(!PostingState::Excluded.can_transition_to(PostingState::Posted));
        assert!(!PostingState::Missing.can_transition_to(PostingState::Unposted));
    }

    #[test]
    fn test_event_type_parsing_falls_back_to_other() {
        assert_eq!(
            "gateway_settlement".parse::<EventType>().unwrap(),
            EventType::GatewaySettlement
        );
        assert_eq!("COURIER_REMIT".parse::<EventType>().unwrap(), EventType::Other);
    }
}
