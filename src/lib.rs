//! Readport Library
//!
//! Reads the newline-delimited text stream of a measurement device over TCP,
//! extracts numeric variables from every message with a configurable regular
//! expression and stores them in fixed-length Parquet packs.
//!
//! This library provides tools for:
//! - Loading an INI configuration with `${section:key}` interpolation
//! - Compiling extraction patterns, optionally with duplicate group names
//! - Turning raw messages into records stamped with their receipt time
//! - Writing packs, optionally split by a grouping variable
//! - Running the reader and the writer as one stream with graceful shutdown

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod group;
pub mod ini;
pub mod logging;
pub mod models;
pub mod parser;
pub mod pattern;
pub mod pipeline;
pub mod shutdown;

// Re-export commonly used types
pub use config::{CompressionAlgorithm, Config, ConfigLoader, LogLevel};
pub use device::DeviceReader;
pub use error::{ReadportError, Result};
pub use group::{GroupKey, GroupSpec, GroupType};
pub use models::{Item, ProcessingStats, Record};
pub use parser::{DestinationTemplate, PackWriter, StreamParser};
pub use pattern::{AliasingEngine, CompiledPattern, PatternValidator, RegexEngine, StandardEngine};
