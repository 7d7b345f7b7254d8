//! INI-style configuration source parsing.
//!
//! Supports `[section]` headers, `key = value` / `key: value` pairs and
//! full-line `#` or `;` comments. Values may reference other values with
//! `${section:key}` (or `${key}` within the same section); `$$` is a literal
//! dollar sign. References are resolved against the literal values of the
//! document in a single pass: substituted text is not expanded again.

use crate::error::{ReadportError, Result};
use std::collections::HashMap;

/// A parsed configuration source
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    /// Parse the literal values of every section
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for (line_num, line) in text.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        ReadportError::configuration(format!(
                            "line {}: malformed section header '{}'",
                            line_num, line
                        ))
                    })?;
                if sections.contains_key(name) {
                    return Err(ReadportError::configuration(format!(
                        "line {}: section [{}] is defined more than once",
                        line_num, name
                    )));
                }
                sections.insert(name.to_string(), HashMap::new());
                current = Some(name.to_string());
                continue;
            }

            let Some(section) = current.as_ref() else {
                return Err(ReadportError::configuration(format!(
                    "line {}: '{}' appears before any [section] header",
                    line_num, line
                )));
            };

            let delimiter = line.find(['=', ':']).ok_or_else(|| {
                ReadportError::configuration(format!(
                    "line {}: expected 'key = value', found '{}'",
                    line_num, line
                ))
            })?;
            let key = line[..delimiter].trim().to_lowercase();
            let value = line[delimiter + 1..].trim().to_string();

            if key.is_empty() {
                return Err(ReadportError::configuration(format!(
                    "line {}: missing option name before '{}'",
                    line_num,
                    &line[delimiter..delimiter + 1]
                )));
            }

            let options = sections.entry(section.clone()).or_default();
            if options.contains_key(&key) {
                return Err(ReadportError::configuration(format!(
                    "line {}: option '{}' in section [{}] is defined more than once",
                    line_num, key, section
                )));
            }
            options.insert(key, value);
        }

        Ok(Self { sections })
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// The literal value of an option, without interpolation
    pub fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|options| options.get(&key.to_lowercase()))
            .map(String::as_str)
    }

    /// The value of an option with references resolved
    pub fn get(&self, section: &str, key: &str) -> Result<Option<String>> {
        match self.raw(section, key) {
            Some(value) => self.interpolate(value, section).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve `${section:key}` and `${key}` references in `value`
    pub fn interpolate(&self, value: &str, current_section: &str) -> Result<String> {
        let mut resolved = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(pos) = rest.find('$') {
            resolved.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                resolved.push('$');
                rest = tail;
            } else if let Some(tail) = after.strip_prefix('{') {
                let end = tail.find('}').ok_or_else(|| {
                    ReadportError::configuration(format!(
                        "unterminated reference in '{}' (section [{}])",
                        value, current_section
                    ))
                })?;
                let reference = &tail[..end];
                let (section, key) = reference
                    .split_once(':')
                    .unwrap_or((current_section, reference));

                let target = self.raw(section.trim(), key.trim()).ok_or_else(|| {
                    ReadportError::configuration(format!(
                        "cannot resolve reference '${{{}}}' in '{}' (section [{}])",
                        reference, value, current_section
                    ))
                })?;
                resolved.push_str(target);
                rest = &tail[end + 1..];
            } else {
                resolved.push('$');
                rest = after;
            }
        }
        resolved.push_str(rest);

        Ok(resolved)
    }
}
