//! Keyword-driven header to canonical field mapping.
//!
//! Rules are data: the built-in table can be replaced by a JSON file without touching the
//! scoring or normalization code.

use crate::domain::CanonicalField;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One substring rule over a normalized header.
///
/// Matches when the header contains every `all` keyword and none of the `none` keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub field: CanonicalField,
    pub all: Vec<String>,
    #[serde(default)]
    pub none: Vec<String>,
}

impl HeaderRule {
    fn new(field: CanonicalField, all: &[&str], none: &[&str]) -> Self {
        Self {
            field,
            all: all.iter().map(|s| s.to_string()).collect(),
            none: none.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.all.iter().all(|k| normalized.contains(k.as_str()))
            && !self.none.iter().any(|k| normalized.contains(k.as_str()))
    }
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("cannot read header rules file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("invalid header rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("header rule for {0} has no keywords")]
    EmptyRule(CanonicalField),
}

/// Ordered rule table; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderRules {
    rules: Vec<HeaderRule>,
}

impl Default for HeaderRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl HeaderRules {
    pub fn new(rules: Vec<HeaderRule>) -> Result<Self, RulesError> {
        if let Some(rule) = rules
            .iter()
            .find(|r| r.all.iter().all(|k| normalize_header(k).is_empty()))
        {
            return Err(RulesError::EmptyRule(rule.field));
        }
        let rules = rules
            .into_iter()
            .map(|r| HeaderRule {
                field: r.field,
                all: r.all.iter().map(|k| normalize_header(k)).collect(),
                none: r.none.iter().map(|k| normalize_header(k)).collect(),
            })
            .collect();
        Ok(Self { rules })
    }

    pub fn builtin() -> Self {
        use CanonicalField::*;
        Self {
            rules: vec![
                HeaderRule::new(SubOrderId, &["suborder"], &[]),
                HeaderRule::new(TxnDate, &["date"], &[]),
                HeaderRule::new(
                    OrderId,
                    &["order"],
                    &["amount", "value", "status", "type", "item", "qty", "quantity"],
                ),
                HeaderRule::new(Sku, &["sku"], &[]),
                HeaderRule::new(Qty, &["qty"], &[]),
                HeaderRule::new(Qty, &["quantity"], &[]),
                HeaderRule::new(ShippingFee, &["shipping"], &[]),
                HeaderRule::new(CommissionFee, &["commission"], &[]),
                HeaderRule::new(FixedFee, &["fixed"], &[]),
                HeaderRule::new(ClosingFee, &["closing"], &[]),
                HeaderRule::new(RefundAmount, &["refund"], &[]),
                HeaderRule::new(TotalFees, &["fee"], &["shipping", "commission"]),
                HeaderRule::new(OtherCharges, &["charge"], &[]),
                HeaderRule::new(OtherCharges, &["adjustment"], &[]),
                HeaderRule::new(OtherCharges, &["deduction"], &[]),
                HeaderRule::new(GrossSales, &["gross"], &[]),
                HeaderRule::new(GrossSales, &["sale"], &[]),
                HeaderRule::new(GrossSales, &["itemprice"], &[]),
                HeaderRule::new(GrossSales, &["ordervalue"], &[]),
                HeaderRule::new(NetPayout, &["net"], &[]),
                HeaderRule::new(NetPayout, &["payout"], &[]),
                HeaderRule::new(NetPayout, &["settled"], &[]),
                HeaderRule::new(SettlementType, &["type"], &[]),
                HeaderRule::new(NetPayout, &["amount"], &[]),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, RulesError> {
        let rules: Vec<HeaderRule> = serde_json::from_str(json)?;
        Self::new(rules)
    }

    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RulesError::Io(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    /// Map a raw header to its canonical field, if any rule matches.
    pub fn map_header(&self, header: &str) -> Option<CanonicalField> {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|r| r.matches(&normalized))
            .map(|r| r.field)
    }

    pub fn rules(&self) -> &[HeaderRule] {
        &self.rules
    }
}

/// Lowercase and drop every non-alphanumeric character.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
