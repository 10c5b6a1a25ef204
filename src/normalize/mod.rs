//! Settlement row normalization.
//!
//! Maps heterogeneous column headers onto canonical fields and coerces cell text into
//! typed values. Normalization is pure: the same header/body input always yields the
//! same row.

pub mod coerce;
pub mod rules;

pub use coerce::{parse_amount, parse_count, parse_date, parse_text};
pub use rules::{normalize_header, HeaderRule, HeaderRules, RulesError};

use crate::domain::{CanonicalField, Decimal, KeyedSettlementRow, SettlementRow};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Normalize one body row against its header cells.
///
/// Cells are zipped positionally; missing cells read as empty text. Every column lands in
/// `raw`, including columns no rule maps. When two columns map to the same field the first
/// non-null value wins.
pub fn normalize_row(rules: &HeaderRules, header_cells: &[String], body_row: &[String]) -> SettlementRow {
    let mut row = SettlementRow::default();
    let width = header_cells.len().max(body_row.len());

    for i in 0..width {
        let header = header_cells.get(i).map(|s| s.trim()).unwrap_or("");
        let cell = body_row.get(i).map(|s| s.as_str()).unwrap_or("");

        let key = raw_key(&row.raw, header, i);
        row.raw.insert(key, cell.trim().to_string());

        if let Some(field) = rules.map_header(header) {
            apply_field(&mut row, field, cell);
        }
    }

    row
}

fn raw_key(raw: &BTreeMap<String, String>, header: &str, index: usize) -> String {
    let base = if header.is_empty() {
        format!("column_{}", index + 1)
    } else {
        header.to_string()
    };
    if !raw.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !raw.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Typed destination of one canonical field within a row.
enum Slot<'a> {
    Text(&'a mut Option<String>),
    Date(&'a mut Option<NaiveDate>),
    Count(&'a mut Option<i64>),
    Amount(&'a mut Option<Decimal>),
}

fn slot(row: &mut SettlementRow, field: CanonicalField) -> Slot<'_> {
    match field {
        CanonicalField::TxnDate => Slot::Date(&mut row.txn_date),
        CanonicalField::OrderId => Slot::Text(&mut row.order_id),
        CanonicalField::SubOrderId => Slot::Text(&mut row.sub_order_id),
        CanonicalField::Sku => Slot::Text(&mut row.sku),
        CanonicalField::Qty => Slot::Count(&mut row.qty),
        CanonicalField::GrossSales => Slot::Amount(&mut row.gross_sales),
        CanonicalField::NetPayout => Slot::Amount(&mut row.net_payout),
        CanonicalField::ShippingFee => Slot::Amount(&mut row.shipping_fee),
        CanonicalField::CommissionFee => Slot::Amount(&mut row.commission_fee),
        CanonicalField::FixedFee => Slot::Amount(&mut row.fixed_fee),
        CanonicalField::ClosingFee => Slot::Amount(&mut row.closing_fee),
        CanonicalField::TotalFees => Slot::Amount(&mut row.total_fees),
        CanonicalField::RefundAmount => Slot::Amount(&mut row.refund_amount),
        CanonicalField::OtherCharges => Slot::Amount(&mut row.other_charges),
        CanonicalField::SettlementType => Slot::Text(&mut row.settlement_type),
    }
}

// First non-null value wins.
fn apply_field(row: &mut SettlementRow, field: CanonicalField, cell: &str) {
    match slot(row, field) {
        Slot::Text(value) if value.is_none() => *value = parse_text(cell),
        Slot::Date(value) if value.is_none() => *value = parse_date(cell),
        Slot::Count(value) if value.is_none() => *value = parse_count(cell),
        Slot::Amount(value) if value.is_none() => *value = parse_amount(cell),
        _ => {}
    }
}

/// Stable digest of a raw column map: SHA-256 truncated to 128 bits, hex encoded.
pub fn row_digest(raw: &BTreeMap<String, String>) -> String {
    fn hash_var(hasher: &mut Sha256, data: &str) {
        hasher.update((data.len() as u32).to_le_bytes());
        hasher.update(data.as_bytes());
    }

    let mut hasher = Sha256::new();
    for (column, value) in raw {
        hash_var(&mut hasher, column);
        hash_var(&mut hasher, value);
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

/// Attach natural keys to rows in document order.
///
/// Identical rows within one document are told apart by their occurrence ordinal, so
/// re-normalizing the same document always yields the same keys.
pub fn key_rows(rows: Vec<SettlementRow>) -> Vec<KeyedSettlementRow> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let digest = row_digest(&row.raw);
            let seen = occurrences.entry(digest.clone()).or_insert(0);
            let row_key = format!("{}-{}", digest, seen);
            *seen += 1;
            KeyedSettlementRow {
                row_key,
                row_index: index as i64,
                row,
            }
        })
        .collect()
}

/// Count distinct canonical fields recognised among a row's cells.
pub fn field_score(rules: &HeaderRules, cells: &[String]) -> usize {
    let mut seen: Vec<CanonicalField> = cells.iter().filter_map(|c| rules.map_header(c)).collect();
    seen.sort();
    seen.dedup();
    seen.len()
}
