//! Bank statement credit lines.

use crate::domain::Decimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One bank statement line, as imported by the bank feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransaction {
    pub id: i64,
    pub txn_date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub description: String,
    pub reference_no: Option<String>,
    /// Credit amount, never negative.
    pub credit: Decimal,
    pub currency: Option<String>,
    pub is_matched: bool,
    pub is_void: bool,
}

impl BankTransaction {
    /// Date used for window matching: value date when present, else booking date.
    pub fn anchor_date(&self) -> NaiveDate {
        self.value_date.unwrap_or(self.txn_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBankTransaction {
    pub txn_date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub description: String,
    pub reference_no: Option<String>,
    pub credit: Decimal,
    pub currency: Option<String>,
}
