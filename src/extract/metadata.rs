//! Batch-level metadata read from the document's plain text.

use crate::normalize::parse_date;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Currency codes recognised in document text.
pub const KNOWN_CURRENCIES: [&str; 9] = ["INR", "USD", "EUR", "GBP", "AED", "SGD", "AUD", "CAD", "JPY"];

const DATE: &str = r"\d{1,4}[/.\-]\d{1,2}[/.\-]\d{1,4}|\d{1,2}\s+[A-Za-z]{3,9},?\s+\d{4}|[A-Za-z]{3,9}\s+\d{1,2},\s*\d{4}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub batch_ref: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub deposit_date: Option<NaiveDate>,
    pub currency: Option<String>,
}

fn batch_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:settlement|payout|batch)\s*(?:id|ref(?:erence)?(?:\s*(?:no|number|#))?)\.?\s*[:#\-]?\s*([A-Za-z0-9][A-Za-z0-9\-_/]{2,})",
        )
        .expect("batch ref regex")
    })
}

fn period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)settlement\s*period\s*[:\-]?\s*({DATE})\s*(?:to|till|until|through|[-–—])\s*({DATE})"
        ))
        .expect("period regex")
    })
}

fn deposit_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(?:deposit|payout|payment|settlement|credit)\s*date\s*[:\-]?\s*({DATE})"
        ))
        .expect("deposit date regex")
    })
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b({})\b", KNOWN_CURRENCIES.join("|"))).expect("currency regex")
    })
}

/// Extract batch reference, settlement period, deposit date and currency from plain text.
pub fn extract_metadata(text: &str) -> DocumentMeta {
    let batch_ref = batch_ref_re()
        .captures(text)
        .map(|c| c[1].trim_end_matches(&['-', '/'][..]).to_string());

    let (period_start, period_end) = period_re()
        .captures(text)
        .map(|c| (parse_date(&c[1]), parse_date(&c[2])))
        .unwrap_or((None, None));

    let deposit_date = deposit_date_re()
        .captures(text)
        .and_then(|c| parse_date(&c[1]));

    DocumentMeta {
        batch_ref,
        period_start,
        period_end,
        deposit_date,
        currency: detect_currency(text),
    }
}

fn detect_currency(text: &str) -> Option<String> {
    if let Some(c) = currency_re().captures(text) {
        return Some(c[1].to_string());
    }
    if text.contains('₹') {
        Some("INR".to_string())
    } else if text.contains('€') {
        Some("EUR".to_string())
    } else if text.contains('£') {
        Some("GBP".to_string())
    } else {
        None
    }
}
