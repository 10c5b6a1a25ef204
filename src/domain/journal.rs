//! Ledger posting lines and journal references.

use crate::domain::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a preview line plays; each role resolves to one ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingRole {
    SettlementClearing,
    CommissionExpense,
    ShippingExpense,
    FixedFeeExpense,
    ClosingFeeExpense,
    OtherFeeExpense,
    OtherCharges,
    SalesReturns,
    SalesRevenue,
    SettlementDifference,
}

impl PostingRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingRole::SettlementClearing => "settlement_clearing",
            PostingRole::CommissionExpense => "commission_expense",
            PostingRole::ShippingExpense => "shipping_expense",
            PostingRole::FixedFeeExpense => "fixed_fee_expense",
            PostingRole::ClosingFeeExpense => "closing_fee_expense",
            PostingRole::OtherFeeExpense => "other_fee_expense",
            PostingRole::OtherCharges => "other_charges",
            PostingRole::SalesReturns => "sales_returns",
            PostingRole::SalesRevenue => "sales_revenue",
            PostingRole::SettlementDifference => "settlement_difference",
        }
    }
}

impl FromStr for PostingRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "settlement_clearing" => Ok(PostingRole::SettlementClearing),
            "commission_expense" => Ok(PostingRole::CommissionExpense),
            "shipping_expense" => Ok(PostingRole::ShippingExpense),
            "fixed_fee_expense" => Ok(PostingRole::FixedFeeExpense),
            "closing_fee_expense" => Ok(PostingRole::ClosingFeeExpense),
            "other_fee_expense" => Ok(PostingRole::OtherFeeExpense),
            "other_charges" => Ok(PostingRole::OtherCharges),
            "sales_returns" => Ok(PostingRole::SalesReturns),
            "sales_revenue" => Ok(PostingRole::SalesRevenue),
            "settlement_difference" => Ok(PostingRole::SettlementDifference),
            other => Err(format!("unknown posting role: {}", other)),
        }
    }
}

impl fmt::Display for PostingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger account a role resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub account_id: i64,
    pub account_name: String,
}

/// One line of a posting preview. Unresolved accounts keep `account_id = None` and a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewLine {
    pub role: PostingRole,
    pub account_id: Option<i64>,
    pub account_name: Option<String>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub warnings: Vec<String>,
}

impl PreviewLine {
    pub fn is_resolved(&self) -> bool {
        self.account_id.is_some()
    }
}

/// Journal creation request handed to the ledger collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRequest {
    /// Idempotency key; the ledger returns the existing journal for a repeated key.
    pub source_ref: String,
    pub memo: String,
    pub created_by: String,
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalLine {
    pub account_id: i64,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// Ledger's reference to a created journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRef {
    pub id: i64,
    pub doc_no: String,
}
