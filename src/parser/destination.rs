//! Output path templates.
//!
//! A destination is rendered once per flushed pack. Supported placeholders
//! are `{date:<strftime>}`, `{station}`, `{device}` and `{group}`; `{{` and
//! `}}` produce literal braces. A destination without a date placeholder is
//! a directory, and a default timestamped file name is appended to it.

use crate::error::{ReadportError, Result};
use crate::group::GroupKey;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// strftime used for `{date}` and for default file names.
/// Sub-second precision keeps packs flushed within one second apart.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%f";

/// File extension of the emitted packs
pub const PACK_EXTENSION: &str = "parquet";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date(String),
    Station,
    Device,
    Group,
}

/// A validated destination template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTemplate {
    raw: String,
    station: String,
    device: String,
    segments: Vec<Segment>,
}

impl DestinationTemplate {
    /// Parse `raw`, filling `{station}` and `{device}` from the arguments.
    ///
    /// When `raw` names a directory the default file name includes the group
    /// key if `grouping` is set.
    pub fn parse(
        raw: &str,
        station: impl Into<String>,
        device: impl Into<String>,
        grouping: bool,
    ) -> Result<Self> {
        let mut segments = parse_segments(raw)?;

        if !segments.iter().any(|s| matches!(s, Segment::Date(_))) {
            let directory = if raw.trim().is_empty() { "." } else { raw };
            let file_name = if grouping {
                format!("{{station}}_{{device}}_{{group}}_{{date:{DEFAULT_DATE_FORMAT}}}.{PACK_EXTENSION}")
            } else {
                format!("{{station}}_{{device}}_{{date:{DEFAULT_DATE_FORMAT}}}.{PACK_EXTENSION}")
            };
            let joined = format!("{}/{}", directory.trim_end_matches('/'), file_name);
            segments = parse_segments(&joined)?;
        }

        Ok(Self {
            raw: raw.to_string(),
            station: station.into(),
            device: device.into(),
            segments,
        })
    }

    /// The template as written in the configuration
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Render the output path for a pack flushed at `now`
    pub fn render(&self, now: DateTime<Utc>, group: &GroupKey) -> Result<PathBuf> {
        let mut path = String::new();
        for segment in &self.segments {
            let written = match segment {
                Segment::Literal(text) => {
                    path.push_str(text);
                    Ok(())
                }
                Segment::Date(format) => {
                    write!(path, "{}", now.format_with_items(StrftimeItems::new(format)))
                }
                Segment::Station => write!(path, "{}", self.station),
                Segment::Device => write!(path, "{}", self.device),
                Segment::Group => write!(path, "{}", group),
            };
            written.map_err(|_| {
                ReadportError::parse(format!("cannot render destination '{}'", self.raw))
            })?;
        }
        Ok(PathBuf::from(path))
    }
}

fn parse_segments(raw: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(ReadportError::configuration(format!(
                        "[parser] destination '{}' has an unterminated placeholder",
                        raw
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(parse_field(&field, raw)?);
            }
            '}' => {
                return Err(ReadportError::configuration(format!(
                    "[parser] destination '{}' has an unmatched '}}'; use '}}}}' for a literal brace",
                    raw
                )));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

fn parse_field(field: &str, raw: &str) -> Result<Segment> {
    let (name, format) = match field.split_once(':') {
        Some((name, format)) => (name.trim(), Some(format)),
        None => (field.trim(), None),
    };

    match (name, format) {
        ("date", format) => {
            let format = format.unwrap_or(DEFAULT_DATE_FORMAT);
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(ReadportError::configuration(format!(
                    "[parser] destination '{}' has an invalid date format '{}'",
                    raw, format
                )));
            }
            Ok(Segment::Date(format.to_string()))
        }
        ("station", None) => Ok(Segment::Station),
        ("device", None) => Ok(Segment::Device),
        ("group", None) => Ok(Segment::Group),
        _ => Err(ReadportError::configuration(format!(
            "[parser] destination '{}' has an unknown placeholder '{{{}}}'",
            raw, field
        ))),
    }
}

/// `path`, or the first of `stem_1.ext`, `stem_2.ext`, ... that does not exist
pub fn unused_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
            + chrono::Duration::microseconds(123_456)
    }

    #[test]
    fn test_render_explicit_template() {
        let template =
            DestinationTemplate::parse("/data/{station}_{device}_{date:%H-%M-%S}.parquet", "MSU", "Test1", false)
                .unwrap();
        let path = template.render(instant(), &GroupKey::Ungrouped).unwrap();
        assert_eq!(path, PathBuf::from("/data/MSU_Test1_14-07-09.parquet"));
    }

    #[test]
    fn test_directory_gets_default_file_name() {
        let template = DestinationTemplate::parse("./data/", "MSU", "Test", false).unwrap();
        assert_eq!(template.raw(), "./data/");
        let path = template.render(instant(), &GroupKey::Ungrouped).unwrap();
        assert_eq!(
            path,
            PathBuf::from("./data/MSU_Test_2024-03-05_14-07-09_123456000.parquet")
        );
    }

    #[test]
    fn test_grouped_directory_includes_group_key() {
        let template = DestinationTemplate::parse("out", "MSU", "Test", true).unwrap();
        let path = template.render(instant(), &GroupKey::Int(2)).unwrap();
        assert_eq!(
            path,
            PathBuf::from("out/MSU_Test_2_2024-03-05_14-07-09_123456000.parquet")
        );
    }

    #[test]
    fn test_escaped_braces() {
        let template = DestinationTemplate::parse("{{x}}/{date:%Y}", "s", "d", false).unwrap();
        let path = template.render(instant(), &GroupKey::Ungrouped).unwrap();
        assert_eq!(path, PathBuf::from("{x}/2024"));
    }

    #[test]
    fn test_invalid_templates() {
        for raw in ["{date:%Q}", "{nope}", "{date", "a}b", "{station:x}/{date}"] {
            assert!(
                matches!(
                    DestinationTemplate::parse(raw, "s", "d", false),
                    Err(ReadportError::Configuration { .. })
                ),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_unused_path_adds_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pack.parquet");
        assert_eq!(unused_path(&path), path);

        std::fs::write(&path, b"x").unwrap();
        std::fs::write(temp_dir.path().join("pack_1.parquet"), b"x").unwrap();
        assert_eq!(unused_path(&path), temp_dir.path().join("pack_2.parquet"));
    }
}
