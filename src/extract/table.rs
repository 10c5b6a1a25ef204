//! Header row selection over candidate tables.

use crate::normalize::{field_score, HeaderRules};
use serde::{Deserialize, Serialize};

/// Cell keywords that suggest a financial header.
const HEADER_KEYWORDS: [&str; 8] = [
    "order",
    "sku",
    "qty",
    "amount",
    "fee",
    "payout",
    "transaction",
    "date",
];

/// Header candidacy score, ordered by field score then keyword score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeaderScore {
    pub field: usize,
    pub keyword: usize,
}

/// The winning table: its header row and the non-blank rows below it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub header_cells: Vec<String>,
    pub body_rows: Vec<Vec<String>>,
    pub score: HeaderScore,
}

impl ExtractedTable {
    pub fn is_empty(&self) -> bool {
        self.body_rows.is_empty()
    }
}

/// Count cells containing any header keyword.
pub fn keyword_score(cells: &[String]) -> usize {
    cells
        .iter()
        .filter(|c| {
            let lower = c.to_lowercase();
            HEADER_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .count()
}

pub fn score_row(rules: &HeaderRules, cells: &[String]) -> HeaderScore {
    HeaderScore {
        field: field_score(rules, cells),
        keyword: keyword_score(cells),
    }
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

/// Pick the header row with the highest score across every table.
///
/// Exact ties go to the earliest row in document order. When no row recognises a single
/// canonical field the result is empty.
pub fn select_table(rules: &HeaderRules, tables: &[Vec<Vec<String>>]) -> ExtractedTable {
    let mut best: Option<(HeaderScore, usize, usize)> = None;

    for (ti, table) in tables.iter().enumerate() {
        for (ri, row) in table.iter().enumerate() {
            if is_blank(row) {
                continue;
            }
            let score = score_row(rules, row);
            if best.map(|(b, _, _)| score > b).unwrap_or(true) {
                best = Some((score, ti, ri));
            }
        }
    }

    let Some((score, ti, ri)) = best.filter(|(s, _, _)| s.field > 0) else {
        return ExtractedTable::default();
    };

    let table = &tables[ti];
    ExtractedTable {
        header_cells: table[ri].clone(),
        body_rows: table[ri + 1..]
            .iter()
            .filter(|row| !is_blank(row))
            .cloned()
            .collect(),
        score,
    }
}
