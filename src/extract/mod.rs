//! Document table extraction.
//!
//! Locates the most plausible data table and header row in an untrusted settlement
//! document (markup, or a delimited export) and reads batch metadata from its text.
//! Extraction never fails: a document with nothing usable yields an empty table.

pub mod delimited;
pub mod markup;
pub mod metadata;
pub mod table;

pub use metadata::{extract_metadata, DocumentMeta};
pub use table::{select_table, ExtractedTable, HeaderScore};

use crate::normalize::HeaderRules;
use regex::Regex;
use std::sync::OnceLock;

fn markup_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(?:table|tr|td|th|html|body|div)\b").expect("markup hint regex"))
}

/// A parsed settlement document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub table: ExtractedTable,
    pub meta: DocumentMeta,
}

/// Select the header row and body rows from markup.
pub fn extract_table(rules: &HeaderRules, markup: &str) -> ExtractedTable {
    select_table(rules, &markup::tables(markup))
}

/// Parse document text, choosing the markup or delimited reader by content.
pub fn parse_document(rules: &HeaderRules, text: &str) -> ParsedDocument {
    let plain = markup::plain_text(text);
    let meta = extract_metadata(&plain);

    let table = if markup_hint_re().is_match(text) {
        extract_table(rules, text)
    } else {
        delimited::delimited_table(text)
            .map(|rows| select_table(rules, &[rows]))
            .unwrap_or_default()
    };

    ParsedDocument { table, meta }
}
