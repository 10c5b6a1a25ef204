//! Tolerant scanning of table-like regions in untrusted markup.
//!
//! Nothing here assumes a well-formed tree: a region runs from its opening tag to the
//! matching close tag, the next sibling opening tag, or the end of the enclosing text,
//! whichever comes first.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?(?:</(?:script|style)\s*>|\z)")
            .expect("script/style regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"))
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("comment regex"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:#(\d{1,7})|#[xX]([0-9a-fA-F]{1,6})|([a-zA-Z]{2,8}));")
            .expect("entity regex")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

fn table_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<table\b[^>]*>").expect("table open regex"))
}

fn table_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</table\s*>").expect("table close regex"))
}

fn row_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<tr\b[^>]*>").expect("row open regex"))
}

fn row_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</tr\s*>").expect("row close regex"))
}

fn cell_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<t[dh]\b[^>]*>").expect("cell open regex"))
}

fn cell_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</t[dh]\s*>").expect("cell close regex"))
}

/// Remove script/style blocks and comments.
pub fn strip_non_content(markup: &str) -> String {
    let without_comments = comment_re().replace_all(markup, " ");
    script_style_re()
        .replace_all(&without_comments, " ")
        .into_owned()
}

/// Plain text of the whole document, used for metadata extraction only.
pub fn plain_text(markup: &str) -> String {
    let content = strip_non_content(markup);
    clean_text(&content)
}

/// Strip tags, decode entities and collapse whitespace.
pub fn clean_text(fragment: &str) -> String {
    let untagged = tag_re().replace_all(fragment, " ");
    let decoded = decode_entities(&untagged);
    whitespace_re().replace_all(&decoded, " ").trim().to_string()
}

/// Decode the handful of entities settlement mailers actually emit, plus numeric references.
pub fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                caps.get(3).and_then(|name| named_entity(name.as_str()))
            };
            match decoded {
                Some('\u{a0}') => " ".to_string(),
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "ndash" => Some('–'),
        "mdash" => Some('—'),
        "rupee" => Some('₹'),
        "euro" => Some('€'),
        "pound" => Some('£'),
        _ => None,
    }
}

/// Split text into regions opened by `open`, each ending at the next `close`, the next
/// `open`, or the end of the text.
fn regions<'a>(text: &'a str, open: &Regex, close: &Regex) -> Vec<&'a str> {
    let opens: Vec<_> = open.find_iter(text).collect();
    opens
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let next_open = opens.get(i + 1).map(|n| n.start()).unwrap_or(text.len());
            let end = close
                .find_at(text, m.end())
                .map(|c| c.start())
                .filter(|&c| c < next_open)
                .unwrap_or(next_open);
            &text[m.end()..end]
        })
        .collect()
}

/// Every table in the document as rows of cleaned cell text.
///
/// A document with rows but no `<table>` tag is treated as one table.
pub fn tables(markup: &str) -> Vec<Vec<Vec<String>>> {
    let content = strip_non_content(markup);

    let mut table_regions = regions(&content, table_open_re(), table_close_re());
    if table_regions.is_empty() && row_open_re().is_match(&content) {
        table_regions.push(content.as_str());
    }

    table_regions
        .into_iter()
        .map(|table| {
            regions(table, row_open_re(), row_close_re())
                .into_iter()
                .map(|row| {
                    regions(row, cell_open_re(), cell_close_re())
                        .into_iter()
                        .map(clean_text)
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}
