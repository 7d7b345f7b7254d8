//! Message extraction and pack writing.
//!
//! [`StreamParser`] turns one received chunk into a [`Record`], and
//! [`PackWriter`] batches records into Parquet files of a fixed length.

pub mod destination;
pub mod writer;

#[cfg(test)]
pub mod tests;

pub use self::destination::DestinationTemplate;
pub use self::writer::PackWriter;

use crate::error::{ReadportError, Result};
use crate::models::{Item, Record, epoch_seconds};
use crate::pattern::{CompiledPattern, TIME_VARIABLE};
use tracing::{debug, error};

/// Longest payload excerpt quoted in diagnostics, in characters
const SNIPPET_CHARS: usize = 120;

/// Extracts variables from complete device messages
#[derive(Debug, Clone)]
pub struct StreamParser {
    pattern: CompiledPattern,
}

impl StreamParser {
    pub fn new(pattern: CompiledPattern) -> Self {
        Self { pattern }
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    /// Parse one chunk into a record with an injected `time` variable.
    ///
    /// Fails when the trimmed chunk is not a complete match of the pattern or
    /// when a captured value is not a number. No partial record is returned.
    pub fn extract(&self, item: &Item) -> Result<Record> {
        let frame = trim_framing(&item.payload);

        let Some(captures) = self.pattern.captures(frame) else {
            let excerpt = snippet(&item.payload);
            if item.is_first_chunk {
                // The first read after connecting often starts mid-frame
                debug!("Possibly incomplete first message: {}", excerpt);
                return Err(ReadportError::parse(format!(
                    "Possibly incomplete first message: {}",
                    excerpt
                )));
            }
            error!("Cannot parse a complete message: {}", excerpt);
            return Err(ReadportError::parse(format!(
                "Cannot parse a complete message: {}",
                excerpt
            )));
        };

        let mut record = Record::new();
        for (name, raw) in captures {
            if raw.is_empty() {
                continue;
            }
            let value = std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.trim().parse::<f64>().ok())
                .ok_or_else(|| {
                    let reason = format!(
                        "Cannot convert {} = {:?} to a number in message: {}",
                        name,
                        String::from_utf8_lossy(raw),
                        snippet(&item.payload)
                    );
                    error!("{}", reason);
                    ReadportError::parse(reason)
                })?;
            record.insert(name, value);
        }
        record.insert(TIME_VARIABLE, epoch_seconds(item.timestamp));

        debug!("Got {:?}", record);
        Ok(record)
    }
}

/// Strip framing bytes (STX/ETX, CR, LF, blanks) from both ends
pub fn trim_framing(payload: &[u8]) -> &[u8] {
    let is_framing = |b: &u8| b.is_ascii_control() || b.is_ascii_whitespace();
    let start = payload
        .iter()
        .position(|b| !is_framing(b))
        .unwrap_or(payload.len());
    let end = payload
        .iter()
        .rposition(|b| !is_framing(b))
        .map_or(start, |i| i + 1);
    &payload[start..end]
}

/// Escaped, length-limited excerpt of a payload for log messages
pub fn snippet(payload: &[u8]) -> String {
    let quoted = format!("{:?}", String::from_utf8_lossy(payload));
    if quoted.chars().count() <= SNIPPET_CHARS {
        return quoted;
    }
    let mut cut: String = quoted.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}
