//! Cell text coercion into typed values. Never fails: unusable text yields None.

use crate::domain::Decimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

const DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d-%b-%Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%y",
    "%Y%m%d",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn day_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4}|\d{2})(?:[\sT,].*)?$")
            .expect("day-first date regex")
    })
}

/// Coerce money text into a decimal.
///
/// Keeps digits, `-` and any `.` followed by a digit; everything else (currency symbols,
/// grouping separators, labels) is dropped before parsing.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let chars: Vec<char> = text.chars().collect();
    let cleaned: String = chars
        .iter()
        .enumerate()
        .filter(|(i, c)| match c {
            '0'..='9' | '-' => true,
            '.' => chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()),
            _ => false,
        })
        .map(|(_, c)| *c)
        .collect();

    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Coerce a quantity. Fractional quantities yield None.
pub fn parse_count(text: &str) -> Option<i64> {
    parse_amount(text).and_then(|d| d.to_integral_i64())
}

/// Coerce a date.
///
/// Day-first `D/M/Y`, `D-M-Y` and `D.M.Y` are tried first (two-digit years are 20xx),
/// then ISO/RFC timestamps (taken in UTC) and a few written formats.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = day_first_re().captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }

    parse_date_generic(text)
}

fn parse_date_generic(text: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Trimmed text, None when blank or a bare dash placeholder.
pub fn parse_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| matches!(c, '-' | '—' | '–')) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_amount_strips_currency_and_grouping() {
        assert_eq!(parse_amount("₹1,234.50"), Some(d("1234.50")));
        assert_eq!(parse_amount("INR 450"), Some(d("450")));
        assert_eq!(parse_amount("Rs. 450"), Some(d("450")));
        assert_eq!(parse_amount("-12.75"), Some(d("-12.75")));
    }

    #[test]
    fn test_amount_blank_and_garbage_are_none() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("—"), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("1.2.3"), None);
        assert_eq!(parse_amount("12-34"), None);
    }

    #[test]
    fn test_count_requires_integral_value() {
        assert_eq!(parse_count("2"), Some(2));
        assert_eq!(parse_count("3.00"), Some(3));
        assert_eq!(parse_count("1.5"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn test_day_first_dates() {
        assert_eq!(parse_date("05/06/24"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("05-06-2024"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("5.6.2024"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("31/01/2024 18:45"), Some(date(2024, 1, 31)));
    }

    #[test]
    fn test_iso_and_written_dates() {
        assert_eq!(parse_date("2024-06-05T10:00:00Z"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("2024-06-05"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("2024-06-05 23:10:00"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("5 Jun 2024"), Some(date(2024, 6, 5)));
        assert_eq!(parse_date("Jun 5, 2024"), Some(date(2024, 6, 5)));
    }

    #[test]
    fn test_invalid_dates_are_none() {
        assert_eq!(parse_date("garbage"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("31/02/2024"), None);
        assert_eq!(parse_date("45/13/24"), None);
    }

    #[test]
    fn test_text_placeholders() {
        assert_eq!(parse_text("  AB-12 "), Some("AB-12".to_string()));
        assert_eq!(parse_text("—"), None);
        assert_eq!(parse_text("  "), None);
    }
}
