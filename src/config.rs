//! Configuration loading and validation.
//!
//! The configuration file has three sections:
//!
//! ```text
//! [device]
//! station = MSU
//! name = Test
//! host = 127.0.0.1
//! port = 4001
//! timeout = 30
//!
//! [parser]
//! regex = ^(?P<level>\S+) RH= *(?P<rh>\S+) %RH T= *(?P<temp>\S+) .C\s*$
//! group_by = level:int
//! pack_length = 12000
//! destination = ./data/
//!
//! [logging]
//! level = DEBUG
//! file = readport_${device:port}.log
//! ```
//!
//! A required option that is absent is reported as a missing option; an
//! option that is present but unusable is a configuration error.

use crate::error::{ReadportError, Result};
use crate::group::GroupSpec;
use crate::ini::IniDocument;
use crate::parser::DestinationTemplate;
use crate::pattern::{CompiledPattern, PatternValidator, RegexEngine};
use polars::prelude::ParquetCompression;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::level_filters::LevelFilter;

/// Supported compression algorithms for pack files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    #[default]
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ReadportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "snappy" => Ok(CompressionAlgorithm::Snappy),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "none" | "uncompressed" => Ok(CompressionAlgorithm::Uncompressed),
            other => Err(ReadportError::configuration(format!(
                "[parser] compression '{}' is not one of: snappy, zstd, lz4, none",
                other
            ))),
        }
    }
}

/// Logging threshold, using the level names of the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            // tracing has no level above ERROR
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ReadportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(ReadportError::configuration(format!(
                "[logging] level '{}' is not one of: TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL",
                other
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Validated settings for one device connection
#[derive(Debug, Clone)]
pub struct Config {
    pub station: String,
    pub device: String,
    pub host: String,
    pub port: u16,
    /// `None` disables connect and read timeouts
    pub timeout: Option<Duration>,
    pub pattern: CompiledPattern,
    pub group: GroupSpec,
    pub pack_length: usize,
    pub destination: DestinationTemplate,
    pub compression: CompressionAlgorithm,
    pub log_level: LogLevel,
    pub log_file: PathBuf,
}

/// Reads configuration sources into a [`Config`]
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    validator: PatternValidator,
}

impl ConfigLoader {
    /// Create a loader compiling patterns with `engine`
    pub fn new(engine: Arc<dyn RegexEngine>) -> Self {
        Self {
            validator: PatternValidator::new(engine),
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReadportError::configuration(format!(
                "cannot read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.load_str(&text)
    }

    pub fn load_reader<R: Read>(&self, mut reader: R) -> Result<Config> {
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|e| {
            ReadportError::configuration(format!("cannot read configuration: {}", e))
        })?;
        self.load_str(&text)
    }

    pub fn load_str(&self, text: &str) -> Result<Config> {
        let doc = IniDocument::parse(text)?;

        let station = required(&doc, "device", "station")?;
        let device = required(&doc, "device", "name")?;
        let host = required(&doc, "device", "host")?;
        let port = parse_port(&required(&doc, "device", "port")?)?;
        let timeout = match optional(&doc, "device", "timeout")? {
            Some(value) => parse_timeout(&value)?,
            None => None,
        };

        // The regex is taken verbatim: `$` is an anchor there, not a reference
        let regex = doc
            .raw("parser", "regex")
            .ok_or_else(|| ReadportError::missing_option("parser", "regex"))?;
        let pattern = self.validator.validate(regex)?;
        let group = GroupSpec::resolve(optional(&doc, "parser", "group_by")?.as_deref(), &pattern)?;

        let pack_length = parse_pack_length(&required(&doc, "parser", "pack_length")?)?;
        let destination = DestinationTemplate::parse(
            &required(&doc, "parser", "destination")?,
            station.as_str(),
            device.as_str(),
            group.is_grouping(),
        )?;
        let compression = match optional(&doc, "parser", "compression")? {
            Some(value) => value.parse()?,
            None => CompressionAlgorithm::default(),
        };

        let log_level = required(&doc, "logging", "level")?.parse()?;
        let log_file = PathBuf::from(required(&doc, "logging", "file")?);

        for (key, value) in [("station", &station), ("name", &device), ("host", &host)] {
            if value.is_empty() {
                return Err(ReadportError::configuration(format!(
                    "[device] {} must not be empty",
                    key
                )));
            }
        }
        if log_file.as_os_str().is_empty() {
            return Err(ReadportError::configuration("[logging] file must not be empty"));
        }

        debug!(
            "Loaded configuration for {}/{} at {}:{}",
            station, device, host, port
        );

        Ok(Config {
            station,
            device,
            host,
            port,
            timeout,
            pattern,
            group,
            pack_length,
            destination,
            compression,
            log_level,
            log_file,
        })
    }
}

fn required(doc: &IniDocument, section: &str, key: &str) -> Result<String> {
    doc.get(section, key)?
        .ok_or_else(|| ReadportError::missing_option(section, key))
}

/// An optional value; blank counts as absent
fn optional(doc: &IniDocument, section: &str, key: &str) -> Result<Option<String>> {
    Ok(doc.get(section, key)?.filter(|value| !value.is_empty()))
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ReadportError::configuration(format!(
            "[device] port '{}' must be an integer between 1 and 65535",
            value
        ))),
    }
}

fn parse_timeout(value: &str) -> Result<Option<Duration>> {
    let seconds: f64 = value.parse().map_err(|_| {
        ReadportError::configuration(format!(
            "[device] timeout '{}' must be a number of seconds",
            value
        ))
    })?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ReadportError::configuration(format!(
            "[device] timeout '{}' must be a non-negative number of seconds",
            value
        )));
    }
    // 0 means block without a timeout
    if seconds == 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs_f64(seconds)))
}

fn parse_pack_length(value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(length) if length > 0 => Ok(length),
        _ => Err(ReadportError::configuration(format!(
            "[parser] pack_length '{}' must be a positive integer",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("4001").unwrap(), 4001);
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("40o1").is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("30").unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(parse_timeout("0.5").unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(parse_timeout("0").unwrap(), None);
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_parse_pack_length() {
        assert_eq!(parse_pack_length("12000").unwrap(), 12000);
        assert!(parse_pack_length("0").is_err());
        assert!(parse_pack_length("1.5").is_err());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::Critical.to_level_filter(), LevelFilter::ERROR);
        assert!("LOUD".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_compression_algorithms() {
        assert_eq!(
            "ZSTD".parse::<CompressionAlgorithm>().unwrap(),
            CompressionAlgorithm::Zstd
        );
        assert_eq!(
            "none".parse::<CompressionAlgorithm>().unwrap(),
            CompressionAlgorithm::Uncompressed
        );
        assert!("gzip9".parse::<CompressionAlgorithm>().is_err());
    }
}
