//! Grouping directive (`group_by = <name>:<type>`) resolution.
//!
//! A grouping directive routes records into independent packs keyed by the
//! value of one extracted variable, cast to the directive's type.

use crate::error::{ReadportError, Result};
use crate::pattern::CompiledPattern;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Types a grouping variable may be cast to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Int,
    Float,
    Str,
}

impl FromStr for GroupType {
    type Err = ReadportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" => Ok(GroupType::Int),
            "float" => Ok(GroupType::Float),
            "str" | "string" => Ok(GroupType::Str),
            other => Err(ReadportError::configuration(format!(
                "[parser] unsupported group_by type '{}', expected one of: int, float, str",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupType::Int => "int",
            GroupType::Float => "float",
            GroupType::Str => "str",
        };
        f.write_str(name)
    }
}

/// The grouping variable and its type; the default means "no grouping"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    by: Option<(String, GroupType)>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, dtype: GroupType) -> Self {
        Self {
            by: Some((name.into(), dtype)),
        }
    }

    /// Parse and check a raw `group_by` directive against the pattern
    pub fn resolve(raw: Option<&str>, pattern: &CompiledPattern) -> Result<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(raw) => raw,
        };

        let (name, dtype) = raw.split_once(':').ok_or_else(|| {
            ReadportError::configuration(format!(
                "[parser] group_by '{}' must have the form <variable>:<type>",
                raw
            ))
        })?;
        let (name, dtype) = (name.trim(), dtype.trim());

        if name.is_empty() {
            return Err(ReadportError::configuration(format!(
                "[parser] group_by '{}' is missing the variable name",
                raw
            )));
        }
        if dtype.is_empty() {
            return Err(ReadportError::configuration(format!(
                "[parser] group_by '{}' is missing the data type",
                raw
            )));
        }
        if !pattern.has_group(name) {
            return Err(ReadportError::configuration(format!(
                "[parser] group_by variable '{}' is not a named group of the regex (available: {})",
                name,
                pattern.names().collect::<Vec<_>>().join(", ")
            )));
        }

        Ok(Self::new(name, dtype.parse()?))
    }

    pub fn is_grouping(&self) -> bool {
        self.by.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.by.as_ref().map(|(name, _)| name.as_str())
    }

    /// Cast an extracted value to the routing key
    pub fn key_for(&self, value: f64) -> Result<GroupKey> {
        let Some((name, dtype)) = &self.by else {
            return Ok(GroupKey::Ungrouped);
        };
        if !value.is_finite() && *dtype != GroupType::Str {
            return Err(ReadportError::parse(format!(
                "cannot use {} value {} of '{}' as a group key",
                dtype, value, name
            )));
        }
        Ok(match dtype {
            GroupType::Int => GroupKey::Int(value.trunc() as i64),
            GroupType::Float => GroupKey::Float(value),
            GroupType::Str => GroupKey::Str(value.to_string()),
        })
    }
}

impl fmt::Display for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.by {
            Some((name, dtype)) => write!(f, "{}:{}", name, dtype),
            None => f.write_str("none"),
        }
    }
}

/// The pack a record is routed to
#[derive(Debug, Clone)]
pub enum GroupKey {
    Ungrouped,
    Int(i64),
    Float(f64),
    Str(String),
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GroupKey::Ungrouped, GroupKey::Ungrouped) => true,
            (GroupKey::Int(a), GroupKey::Int(b)) => a == b,
            (GroupKey::Float(a), GroupKey::Float(b)) => a.to_bits() == b.to_bits(),
            (GroupKey::Str(a), GroupKey::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            GroupKey::Ungrouped => {}
            GroupKey::Int(v) => v.hash(state),
            GroupKey::Float(v) => v.to_bits().hash(state),
            GroupKey::Str(v) => v.hash(state),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Ungrouped => Ok(()),
            GroupKey::Int(v) => write!(f, "{}", v),
            GroupKey::Float(v) => write!(f, "{}", v),
            GroupKey::Str(v) => f.write_str(v),
        }
    }
}
