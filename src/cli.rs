//! Command-line interface components.

use crate::pattern::{AliasingEngine, RegexEngine, StandardEngine};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "readport")]
#[command(about = "Read a device TCP stream, extract variables with a regex and store them in Parquet packs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Configuration file with [device], [parser] and [logging] sections
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Regex engine used to compile parser.regex
    #[arg(long, value_enum, default_value_t = EngineChoice::Aliasing)]
    pub regex_engine: EngineChoice,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineChoice {
    /// Allows several groups with the same name
    Aliasing,
    /// Plain `regex` syntax, group names must be unique
    Standard,
}

impl EngineChoice {
    pub fn engine(self) -> Arc<dyn RegexEngine> {
        match self {
            EngineChoice::Aliasing => Arc::new(AliasingEngine),
            EngineChoice::Standard => Arc::new(StandardEngine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["readport", "--config", "readport.ini"]).unwrap();
        assert_eq!(args.config, PathBuf::from("readport.ini"));
        assert_eq!(args.regex_engine, EngineChoice::Aliasing);
        assert!(!args.check);
        assert!(args.regex_engine.engine().supports_duplicate_names());
    }

    #[test]
    fn test_standard_engine_and_check() {
        let args = Args::try_parse_from([
            "readport",
            "-c",
            "conf.ini",
            "--regex-engine",
            "standard",
            "--check",
        ])
        .unwrap();
        assert_eq!(args.regex_engine, EngineChoice::Standard);
        assert_eq!(args.regex_engine.engine().name(), "standard");
        assert!(args.check);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Args::try_parse_from(["readport"]).is_err());
        assert!(Args::try_parse_from(["readport", "-c", "a.ini", "--regex-engine", "pcre"]).is_err());
    }
}
