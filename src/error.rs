//! Error handling for configuration loading and stream parsing.
//!
//! Startup failures are split into missing options (an incomplete file) and
//! configuration errors (a present but invalid value). Per-message failures
//! are parse errors, which the pipeline logs and skips.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadportError {
    #[error("Missing option '{option}' in section [{section}]")]
    MissingOption { section: String, option: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Parse error: {reason}")]
    Parse { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadportError {
    /// Create a missing option error for `[section] option`
    pub fn missing_option(section: impl Into<String>, option: impl Into<String>) -> Self {
        Self::MissingOption {
            section: section.into(),
            option: option.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReadportError>;
