//! Pack writing module
//!
//! Buffers extracted records per group key and writes every complete pack
//! to a new Parquet file with one `Float64` column per variable.

use super::destination::{DestinationTemplate, unused_path};
use crate::config::{CompressionAlgorithm, Config};
use crate::error::{ReadportError, Result};
use crate::group::{GroupKey, GroupSpec};
use crate::models::Record;

use chrono::Utc;
use polars::prelude::{Column, DataFrame, ParquetWriter as PolarsParquetWriter};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Column-oriented rows of one pending pack
#[derive(Debug, Default)]
struct PackBuffer {
    columns: Vec<Vec<f64>>,
    rows: usize,
}

impl PackBuffer {
    fn push(&mut self, row: &[f64]) {
        if self.columns.is_empty() {
            self.columns = vec![Vec::new(); row.len()];
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(*value);
        }
        self.rows += 1;
    }

    fn take(&mut self) -> Vec<Vec<f64>> {
        self.rows = 0;
        std::mem::take(&mut self.columns)
    }
}

/// Accumulates records and flushes packs of `pack_length` rows
#[derive(Debug)]
pub struct PackWriter {
    pack_length: usize,
    destination: DestinationTemplate,
    group: GroupSpec,
    compression: CompressionAlgorithm,
    /// Variable names fixed by the first record, grouping variable excluded
    schema: Option<Vec<String>>,
    buffers: HashMap<GroupKey, PackBuffer>,
    files_written: usize,
}

impl PackWriter {
    /// Create an ungrouped writer with Snappy compression
    pub fn new(pack_length: usize, destination: DestinationTemplate) -> Self {
        Self {
            pack_length: pack_length.max(1),
            destination,
            group: GroupSpec::default(),
            compression: CompressionAlgorithm::default(),
            schema: None,
            buffers: HashMap::new(),
            files_written: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pack_length, config.destination.clone())
            .with_group(config.group.clone())
            .with_compression(config.compression)
    }

    /// Route records into separate packs by a grouping variable
    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.group = group;
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    /// Variable names stored in every pack, once the first record is written
    pub fn schema(&self) -> Option<&[String]> {
        self.schema.as_deref()
    }

    /// Number of buffered rows across all groups
    pub fn pending(&self) -> usize {
        self.buffers.values().map(|b| b.rows).sum()
    }

    pub fn files_written(&self) -> usize {
        self.files_written
    }

    /// Buffer one record, writing its pack when it is complete.
    ///
    /// Returns the path of the emitted file when this record completed a
    /// pack. A record whose variables differ from the schema is rejected
    /// without touching the buffers. A failed flush still discards the pack.
    pub fn write(&mut self, record: &Record) -> Result<Option<PathBuf>> {
        let group_name = self.group.name();
        let key = match group_name {
            Some(name) => {
                let value = record.get(name).ok_or_else(|| {
                    ReadportError::parse(format!(
                        "record is missing the grouping variable '{}'",
                        name
                    ))
                })?;
                self.group.key_for(value)?
            }
            None => GroupKey::Ungrouped,
        };

        let schema = self.schema.get_or_insert_with(|| {
            let names: Vec<String> = record
                .names()
                .filter(|name| Some(*name) != group_name)
                .map(str::to_string)
                .collect();
            debug!("Pack schema: {:?}", names);
            names
        });
        let row = row_for(schema, record, group_name)?;

        let buffer = self.buffers.entry(key.clone()).or_default();
        buffer.push(&row);
        if buffer.rows < self.pack_length {
            return Ok(None);
        }

        let columns = buffer.take();
        self.flush(&key, columns).map(Some)
    }

    /// Write every partially filled pack, e.g. before shutting down.
    ///
    /// All buffers are attempted; the first failure is returned afterwards.
    pub fn flush_all(&mut self) -> Result<Vec<PathBuf>> {
        let keys: Vec<GroupKey> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.rows > 0)
            .map(|(key, _)| key.clone())
            .collect();

        let mut written = Vec::new();
        let mut first_error = None;
        for key in keys {
            let Some(columns) = self.buffers.get_mut(&key).map(PackBuffer::take) else {
                continue;
            };
            match self.flush(&key, columns) {
                Ok(path) => written.push(path),
                Err(e) => {
                    error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn flush(&mut self, key: &GroupKey, columns: Vec<Vec<f64>>) -> Result<PathBuf> {
        let rows = columns.first().map_or(0, Vec::len);
        let names = self.schema.as_deref().unwrap_or_default();

        let rendered = self.destination.render(Utc::now(), key)?;
        if let Some(parent) = rendered.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ReadportError::parse(format!(
                    "cannot create directory '{}' for {} records: {}",
                    parent.display(),
                    rows,
                    e
                ))
            })?;
        }
        let path = unused_path(&rendered);

        let mut df = DataFrame::new(
            names
                .iter()
                .zip(columns)
                .map(|(name, values)| Column::new(name.as_str().into(), values))
                .collect(),
        )
        .map_err(|e| ReadportError::parse(format!("cannot assemble pack: {}", e)))?;

        write_parquet(&path, &mut df, self.compression).inspect_err(|_| {
            // Never leave a truncated pack behind
            let _ = fs::remove_file(&path);
        })?;

        self.files_written += 1;
        info!("Data saved to '{}' ({} records)", path.display(), rows);
        Ok(path)
    }
}

/// Values of `record` in schema order, or an error naming the differences
fn row_for(schema: &[String], record: &Record, group_name: Option<&str>) -> Result<Vec<f64>> {
    let expected: BTreeSet<&str> = schema.iter().map(String::as_str).collect();
    let incoming: BTreeSet<&str> = record
        .names()
        .filter(|name| Some(*name) != group_name)
        .collect();

    if incoming != expected {
        let missing: Vec<&str> = expected.difference(&incoming).copied().collect();
        let unexpected: Vec<&str> = incoming.difference(&expected).copied().collect();
        return Err(ReadportError::parse(format!(
            "record variables do not match the pack schema (missing: {:?}, unexpected: {:?})",
            missing, unexpected
        )));
    }

    schema
        .iter()
        .map(|name| {
            record
                .get(name)
                .ok_or_else(|| ReadportError::parse(format!("record is missing '{}'", name)))
        })
        .collect()
}

fn write_parquet(path: &Path, df: &mut DataFrame, compression: CompressionAlgorithm) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        ReadportError::parse(format!("cannot create '{}': {}", path.display(), e))
    })?;

    PolarsParquetWriter::new(file)
        .with_compression(compression.to_polars_compression())
        .finish(df)
        .map_err(|e| ReadportError::parse(format!("cannot write '{}': {}", path.display(), e)))?;

    Ok(())
}
