//! Delimited text decoding
//!
//! Shared by the catalog loader and the CSV row source. Files arrive from
//! spreadsheet exports in whatever encoding and separator the user's locale
//! produced, so both are sniffed rather than configured.

use chardet::detect;
use encoding_rs::{Encoding, UTF_8};
use nacre_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// One parsed record keyed by (trimmed) header name
pub type RawRow = BTreeMap<String, String>;

/// Delimiters considered when sniffing, in tie-break order
const CANDIDATE_DELIMITERS: [u8; 3] = [b';', b'\t', b','];

/// Decode raw bytes to text using a statistically detected encoding
///
/// Valid UTF-8 is taken as is. Otherwise the detector picks the encoding,
/// falling back to UTF-8 when it names one `encoding_rs` does not know.
/// Undecodable sequences become U+FFFD rather than failing.
pub fn decode_bytes(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let detection = detect(bytes);
    let encoding = Encoding::for_label(detection.0.as_bytes()).unwrap_or(UTF_8);
    let (decoded, actual, had_errors) = encoding.decode(bytes);

    if had_errors {
        tracing::debug!(
            encoding = actual.name(),
            confidence = detection.1,
            "Decoded with replacement characters"
        );
    }

    decoded.into_owned()
}

/// Pick the delimiter occurring most often in the header line (`,` when none occur)
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0usize;

    for delimiter in CANDIDATE_DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == delimiter).count();
        if count > best_count {
            best = delimiter;
            best_count = count;
        }
    }

    best
}

/// Parse decoded text into header-keyed rows
///
/// Rows may be shorter or longer than the header (missing cells are absent,
/// extra cells are dropped). Completely empty lines are skipped by the reader.
pub fn parse_delimited(text: &str) -> Result<Vec<RawRow>> {
    let text = text.trim_start_matches('\u{feff}');
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = detect_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("Unreadable header line: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| Error::InvalidInput(format!("Malformed record {}: {}", line + 1, e)))?;

        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Read, decode and parse a delimited file
pub fn read_delimited_file(path: &Path) -> Result<Vec<RawRow>> {
    let bytes = std::fs::read(path)?;
    parse_delimited(&decode_bytes(&bytes))
}
