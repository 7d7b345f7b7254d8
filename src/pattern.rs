//! Extraction pattern compilation and validation.
//!
//! Patterns are compiled through a [`RegexEngine`], which is injected into
//! [`PatternValidator`] rather than chosen globally. Two engines are provided:
//! [`StandardEngine`] uses the `regex` crate as is, and [`AliasingEngine`]
//! additionally accepts several groups sharing one name (the same variable
//! appearing at different positions in different message variants) by
//! renaming the repeated declarations before compilation.

use crate::error::{ReadportError, Result};
use regex::bytes::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Variable name reserved for the message receipt timestamp
pub const TIME_VARIABLE: &str = "time";

/// A regex engine capable of compiling extraction patterns
pub trait RegexEngine: fmt::Debug + Send + Sync {
    /// Engine name used in diagnostics
    fn name(&self) -> &'static str;

    /// Whether two or more capture groups may share a name
    fn supports_duplicate_names(&self) -> bool;

    /// Compile `source` into a pattern matching complete messages only
    fn compile(&self, source: &str) -> std::result::Result<CompiledPattern, regex::Error>;
}

/// The `regex` crate without extensions
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEngine;

impl RegexEngine for StandardEngine {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn supports_duplicate_names(&self) -> bool {
        false
    }

    fn compile(&self, source: &str) -> std::result::Result<CompiledPattern, regex::Error> {
        build_pattern(source, source, &HashMap::new())
    }
}

/// The `regex` crate with support for duplicate group names.
///
/// The second and later declarations of a name are renamed to unique aliases
/// (`temp__2`, ...) and mapped back to the logical name after compilation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AliasingEngine;

impl RegexEngine for AliasingEngine {
    fn name(&self) -> &'static str {
        "aliasing"
    }

    fn supports_duplicate_names(&self) -> bool {
        true
    }

    fn compile(&self, source: &str) -> std::result::Result<CompiledPattern, regex::Error> {
        let declarations = named_group_declarations(source);
        let taken: HashSet<&str> = declarations.iter().map(|d| d.name.as_str()).collect();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut aliases: HashMap<String, String> = HashMap::new();
        let mut rewritten = String::with_capacity(source.len() + 16);
        let mut cursor = 0;

        for declaration in &declarations {
            let occurrence = seen.entry(declaration.name.as_str()).or_insert(0);
            *occurrence += 1;
            if *occurrence == 1 {
                continue;
            }

            let mut suffix = *occurrence;
            let alias = loop {
                let candidate = format!("{}__{}", declaration.name, suffix);
                if !taken.contains(candidate.as_str()) && !aliases.contains_key(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };

            rewritten.push_str(&source[cursor..declaration.span.start]);
            rewritten.push_str(&alias);
            cursor = declaration.span.end;
            aliases.insert(alias, declaration.name.clone());
        }
        rewritten.push_str(&source[cursor..]);

        build_pattern(source, &rewritten, &aliases)
    }
}

#[derive(Debug, Clone)]
struct NamedGroup {
    name: String,
    /// Capture indices declaring this name, in pattern order
    indices: Vec<usize>,
}

/// A validated extraction pattern
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
    groups: Vec<NamedGroup>,
    unnamed_groups: usize,
}

impl CompiledPattern {
    /// The pattern as written in the configuration
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct group names in order of first declaration
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// Names declared by more than one group
    pub fn duplicate_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.indices.len() > 1)
            .map(|g| g.name.as_str())
            .collect()
    }

    pub fn unnamed_groups(&self) -> usize {
        self.unnamed_groups
    }

    /// Match the whole of `haystack` and return the participating captures.
    ///
    /// For a name declared several times the last participating group wins.
    /// Groups that take no part in the match are left out.
    pub fn captures<'h>(&self, haystack: &'h [u8]) -> Option<Vec<(&str, &'h [u8])>> {
        let caps = self.regex.captures(haystack)?;
        let found = self
            .groups
            .iter()
            .filter_map(|group| {
                group
                    .indices
                    .iter()
                    .rev()
                    .find_map(|&index| caps.get(index))
                    .map(|m| (group.name.as_str(), m.as_bytes()))
            })
            .collect();
        Some(found)
    }
}

fn build_pattern(
    source: &str,
    rewritten: &str,
    aliases: &HashMap<String, String>,
) -> std::result::Result<CompiledPattern, regex::Error> {
    // Byte semantics: `.` and `\S` match any byte, valid UTF-8 or not
    let regex = RegexBuilder::new(&format!(r"\A(?:{rewritten})\z"))
        .unicode(false)
        .build()?;

    let mut groups: Vec<NamedGroup> = Vec::new();
    let mut unnamed_groups = 0;
    for (index, name) in regex.capture_names().enumerate().skip(1) {
        let Some(name) = name else {
            unnamed_groups += 1;
            continue;
        };
        let logical = aliases.get(name).map(String::as_str).unwrap_or(name);
        match groups.iter_mut().find(|g| g.name == logical) {
            Some(group) => group.indices.push(index),
            None => groups.push(NamedGroup {
                name: logical.to_string(),
                indices: vec![index],
            }),
        }
    }

    Ok(CompiledPattern {
        source: source.to_string(),
        regex,
        groups,
        unnamed_groups,
    })
}

/// A named group declaration found in pattern source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDeclaration {
    pub name: String,
    /// Byte range of the name within the source
    pub span: Range<usize>,
}

/// Find `(?P<name>` and `(?<name>` declarations outside escapes and classes
pub fn named_group_declarations(source: &str) -> Vec<GroupDeclaration> {
    let bytes = source.as_bytes();
    let mut found = Vec::new();
    let mut class_depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'[' => {
                class_depth += 1;
                i += 1;
                // `]` right after the opening bracket is a literal
                if class_depth == 1 {
                    if bytes.get(i) == Some(&b'^') {
                        i += 1;
                    }
                    if bytes.get(i) == Some(&b']') {
                        i += 1;
                    }
                }
                continue;
            }
            b']' if class_depth > 0 => class_depth -= 1,
            b'(' if class_depth == 0 => {
                let rest = &source[i..];
                let prefix = if rest.starts_with("(?P<") {
                    4
                } else if rest.starts_with("(?<") {
                    3
                } else {
                    0
                };
                let start = i + prefix;
                let starts_name = source[start..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
                if prefix > 0 && starts_name {
                    if let Some(len) = source[start..].find('>') {
                        found.push(GroupDeclaration {
                            name: source[start..start + len].to_string(),
                            span: start..start + len,
                        });
                        i = start + len + 1;
                        continue;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    found
}

/// Names declared more than once, in order of their second declaration
pub fn duplicate_group_names(source: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for declaration in named_group_declarations(source) {
        if !seen.insert(declaration.name.clone()) && !duplicates.contains(&declaration.name) {
            duplicates.push(declaration.name);
        }
    }
    duplicates
}

/// Compiles extraction patterns and enforces the variable naming rules
#[derive(Debug, Clone)]
pub struct PatternValidator {
    engine: Arc<dyn RegexEngine>,
}

impl Default for PatternValidator {
    fn default() -> Self {
        Self::new(Arc::new(AliasingEngine))
    }
}

impl PatternValidator {
    pub fn new(engine: Arc<dyn RegexEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &dyn RegexEngine {
        self.engine.as_ref()
    }

    /// Compile `source` and check it can produce well-formed records
    pub fn validate(&self, source: &str) -> Result<CompiledPattern> {
        let engine = self.engine.as_ref();
        let declared_twice = duplicate_group_names(source);

        let pattern = engine.compile(source).map_err(|e| {
            if !declared_twice.is_empty() && !engine.supports_duplicate_names() {
                missing_duplicate_support(engine, &declared_twice)
            } else {
                ReadportError::configuration(format!(
                    "[parser] invalid regex '{}': {}",
                    source, e
                ))
            }
        })?;

        if pattern.unnamed_groups() > 0 {
            return Err(ReadportError::configuration(format!(
                "[parser] regex '{}' has {} unnamed capture group(s); every group must be named, \
                 e.g. (?P<temp>...), or made non-capturing with (?:...)",
                source,
                pattern.unnamed_groups()
            )));
        }

        if pattern.has_group(TIME_VARIABLE) {
            return Err(ReadportError::configuration(format!(
                "[parser] regex '{}' defines a group named '{}'; the name is reserved for the message timestamp",
                source, TIME_VARIABLE
            )));
        }

        let duplicates = pattern.duplicate_names();
        if !duplicates.is_empty() && !engine.supports_duplicate_names() {
            let names: Vec<String> = duplicates.iter().map(|s| s.to_string()).collect();
            return Err(missing_duplicate_support(engine, &names));
        }

        debug!(
            "Compiled regex with the {} engine, variables: {:?}",
            engine.name(),
            pattern.names().collect::<Vec<_>>()
        );

        Ok(pattern)
    }
}

fn missing_duplicate_support(engine: &dyn RegexEngine, names: &[String]) -> ReadportError {
    ReadportError::configuration(format!(
        "[parser] capture group name(s) {:?} are used more than once, which requires duplicate group \
         name support; the '{}' regex engine does not provide it",
        names,
        engine.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_with(engine: impl RegexEngine + 'static, source: &str) -> Result<CompiledPattern> {
        PatternValidator::new(Arc::new(engine)).validate(source)
    }

    fn assert_configuration_error(result: Result<CompiledPattern>, needle: &str) {
        match result {
            Err(ReadportError::Configuration { message }) => {
                assert!(message.contains(needle), "unexpected message: {}", message)
            }
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_declarations_skip_escapes_and_classes() {
        let source = r"\(?P<no>x)[(?P<nope>][^]](?P<a>\d)(?<b>\w)";
        let names: Vec<String> = named_group_declarations(source)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_declaration_spans_point_at_names() {
        let source = "(?P<level>x)";
        let declarations = named_group_declarations(source);
        assert_eq!(declarations.len(), 1);
        assert_eq!(&source[declarations[0].span.clone()], "level");
    }

    #[test]
    fn test_duplicate_group_names() {
        assert_eq!(
            duplicate_group_names("(?P<a>x)|(?P<b>y)|(?P<a>z)|(?P<a>w)"),
            vec!["a".to_string()]
        );
        assert!(duplicate_group_names("(?P<a>x)(?P<b>y)").is_empty());
    }

    #[test]
    fn test_valid_pattern_lists_names_in_order() {
        let pattern = validate_with(StandardEngine, r"x= *(?P<u>\S+) y= *(?P<v>\S+)").unwrap();
        assert_eq!(pattern.names().collect::<Vec<_>>(), vec!["u", "v"]);
        assert!(pattern.has_group("u"));
        assert!(!pattern.has_group("w"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert_configuration_error(
            validate_with(StandardEngine, r"T= *(?P<temp>\S+.*$"),
            "invalid regex",
        );
    }

    #[test]
    fn test_unnamed_group_is_rejected() {
        assert_configuration_error(
            validate_with(AliasingEngine, r"x= *(?P<u>\S+) T= *(\S+).*$"),
            "unnamed",
        );
    }

    #[test]
    fn test_non_capturing_group_is_allowed() {
        assert!(validate_with(StandardEngine, r"(?:x= *)(?P<u>\S+)").is_ok());
    }

    #[test]
    fn test_reserved_time_is_rejected() {
        assert_configuration_error(
            validate_with(StandardEngine, r"x= *(?P<u>\S+) T= *(?P<time>\S+)"),
            "reserved",
        );
    }

    #[test]
    fn test_duplicate_names_need_capable_engine() {
        assert_configuration_error(
            validate_with(StandardEngine, "(?P<name>foo)|(?P<name>bar)"),
            "duplicate group name support",
        );
        assert!(validate_with(AliasingEngine, "(?P<name>foo)|(?P<name>bar)").is_ok());
    }

    #[test]
    fn test_aliasing_engine_maps_aliases_back() {
        let pattern = AliasingEngine
            .compile(r"(?P<a>\d)-(?P<a__2>\d)|(?P<a>x)")
            .unwrap();
        assert_eq!(pattern.names().collect::<Vec<_>>(), vec!["a", "a__2"]);
        assert_eq!(pattern.duplicate_names(), vec!["a"]);

        let caps = pattern.captures(b"x").unwrap();
        assert_eq!(caps, vec![("a", &b"x"[..])]);
    }

    #[test]
    fn test_repeated_name_in_one_branch_keeps_last_capture() {
        let pattern = AliasingEngine.compile(r"(?P<a>\d)-(?P<a>\d)").unwrap();
        let caps = pattern.captures(b"1-2").unwrap();
        assert_eq!(caps, vec![("a", &b"2"[..])]);
    }

    #[test]
    fn test_any_byte_matches_outside_utf8() {
        let pattern = StandardEngine.compile(r"T=(?P<t>\S+) .C").unwrap();
        let caps = pattern.captures(b"T=14.94 \xb0C").unwrap();
        assert_eq!(caps, vec![("t", &b"14.94"[..])]);

        // non-ASCII literals still match their UTF-8 encoding
        let pattern = StandardEngine.compile(r"T=(?P<t>\S+) °C").unwrap();
        assert!(pattern.captures("T=1.5 °C".as_bytes()).is_some());
    }

    #[test]
    fn test_captures_require_full_match() {
        let pattern = StandardEngine.compile(r"(?P<n>\d+)").unwrap();
        assert!(pattern.captures(b"123").is_some());
        assert!(pattern.captures(b"123x").is_none());
        assert!(pattern.captures(b"x123").is_none());
    }

    #[test]
    fn test_alternation_full_match() {
        // Leftmost-first alternation must still consider the longer branch
        let pattern = StandardEngine.compile(r"(?P<n>a)|(?P<m>ab)").unwrap();
        let caps = pattern.captures(b"ab").unwrap();
        assert_eq!(caps, vec![("m", &b"ab"[..])]);
    }
}
