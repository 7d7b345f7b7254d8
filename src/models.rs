//! Core data structures passed between the reader, parser and writer.

use chrono::{DateTime, Utc};

/// One raw chunk received from the device
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Set for the first chunk after a connection was (re)established
    pub is_first_chunk: bool,
}

impl Item {
    pub fn new(payload: impl Into<Vec<u8>>, timestamp: DateTime<Utc>, is_first_chunk: bool) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            is_first_chunk,
        }
    }
}

/// Extracted variables of one message, in pattern order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<(String, f64)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        let index = self.values.iter().position(|(n, _)| n == name)?;
        Some(self.values.remove(index).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Seconds since the UNIX epoch with microsecond resolution
pub fn epoch_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_micros() as f64 / 1_000_000.0
}

/// Counters reported when the pipeline stops
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub items_received: usize,
    pub records_parsed: usize,
    pub items_rejected: usize,
    pub records_rejected: usize,
    pub files_written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_keeps_insertion_order() {
        let mut record: Record = [("u", 1.0), ("v", 2.0)].into_iter().collect();
        record.insert("w", 3.0);
        record.insert("u", 4.0);

        assert_eq!(record.names().collect::<Vec<_>>(), vec!["u", "v", "w"]);
        assert_eq!(record.get("u"), Some(4.0));
        assert_eq!(record.remove("v"), Some(2.0));
        assert_eq!(record.len(), 2);
        assert_eq!(record.remove("v"), None);
    }

    #[test]
    fn test_epoch_seconds() {
        let ts = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap()
            + chrono::Duration::microseconds(500_000);
        assert_eq!(epoch_seconds(ts), 1.5);
    }
}
