// Delimited (CSV/TSV) decoding into a raw cell grid

use std::collections::HashMap;

use sumrec_core::{CellValue, FileRole};

use crate::error::IoError;
use crate::ReadMode;

/// Decode bytes and split into rows of cells. Blank lines are skipped.
pub fn read_grid(bytes: &[u8], role: FileRole, mode: ReadMode) -> Result<Vec<Vec<CellValue>>, IoError> {
    let content = decode_utf8(bytes);
    let delimiter = sniff_delimiter(&content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut grid = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| IoError::malformed(role, e.to_string()))?;
        let row = record
            .iter()
            .map(|field| match mode {
                ReadMode::RawText => CellValue::text(field),
                ReadMode::Typed => CellValue::infer(field),
            })
            .collect();
        grid.push(row);
    }

    log::debug!("{role}: read {} delimited rows (delimiter {:?})", grid.len(), delimiter as char);
    Ok(grid)
}

/// Guess the field delimiter from the first ten non-blank lines.
///
/// Usersetting exports open with single-cell preamble lines, so only lines
/// that split into more than one field vote. Each candidate scores
/// `lines agreeing on its modal field count * that count`; comma on a tie
/// with nothing.
fn sniff_delimiter(content: &str) -> u8 {
    const CANDIDATES: [u8; 4] = [b'\t', b';', b',', b'|'];

    let sample: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(10)
        .collect();

    let mut best = (b',', 0u64);
    for delim in CANDIDATES {
        let mut votes: HashMap<usize, u64> = HashMap::new();
        for line in &sample {
            let n = fields_per_line(line, delim);
            if n > 1 {
                *votes.entry(n).or_default() += 1;
            }
        }

        // more lines first, then more fields
        let score = votes
            .into_iter()
            .max_by_key(|&(fields, lines)| (lines, fields))
            .map_or(0, |(fields, lines)| lines * fields as u64);
        if score > best.1 {
            best = (delim, score);
        }
    }
    best.0
}

fn fields_per_line(line: &str, delim: u8) -> usize {
    csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes())
        .records()
        .next()
        .and_then(Result::ok)
        .map_or(1, |r| r.len())
}

/// Convert to UTF-8 if needed (handles a BOM and Windows-1252 exports).
fn decode_utf8(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            // Fall back to Windows-1252 (common for Excel-exported CSVs)
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}
