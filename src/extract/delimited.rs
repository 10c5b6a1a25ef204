//! Delimited (CSV/TSV) settlement exports read as a single table.

use tracing::debug;

const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];
const SNIFF_LINES: usize = 5;

/// Guess the delimiter from the widest of the first few non-blank lines, so a title or
/// preamble line above the header does not decide it. Ties prefer the earlier delimiter.
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let widest = |delimiter: u8| {
        lines
            .iter()
            .map(|l| l.bytes().filter(|&b| b == delimiter).count())
            .max()
            .unwrap_or(0)
    };

    let mut best = (DELIMITERS[0], 0);
    for delimiter in DELIMITERS {
        let count = widest(delimiter);
        if count > best.1 {
            best = (delimiter, count);
        }
    }
    best.0
}

/// Parse delimited text into rows of trimmed cells.
///
/// Returns None unless the text yields at least two rows and some row has two or more
/// cells; a malformed record ends the table at the last good row.
pub fn delimited_table(text: &str) -> Option<Vec<Vec<String>>> {
    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => {
                let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
                if cells.iter().any(|c| !c.is_empty()) {
                    rows.push(cells);
                }
            }
            Err(e) => {
                debug!(error = %e, rows = rows.len(), "Delimited payload stopped parsing");
                break;
            }
        }
    }

    let wide = rows.iter().any(|r| r.len() >= 2);
    (rows.len() >= 2 && wide).then_some(rows)
}
