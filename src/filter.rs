//! Inclusion and exclusion policy for discovered containers.
//!
//! Patterns are shell-style globs (`*`, `?`, `[...]`) matched against the
//! whole image reference, so `*nginx*` matches
//! `docker.io/library/nginx:1.17`.  Globs are compiled to anchored regular
//! expressions once, when the filter is built.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use regex::Regex;

use crate::error::ConfigError;
use crate::types::Container;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut re = String::from("(?s)^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                    None => return Err(invalid("trailing escape character")),
                },
                '[' => compile_class(&mut chars, &mut re).map_err(invalid)?,
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Translates a `[...]` class whose opening bracket is already consumed.
/// Ranges are emitted explicitly and every member is escaped, so `-`, `&`
/// and `~` never reach the regex engine as class set operators.
fn compile_class(chars: &mut Peekable<Chars<'_>>, re: &mut String) -> Result<(), &'static str> {
    re.push('[');
    if matches!(chars.peek(), Some('!') | Some('^')) {
        chars.next();
        re.push('^');
    }

    let mut first = true;
    loop {
        let start = match chars.next() {
            None => return Err("unterminated character class"),
            Some(']') if !first => break,
            Some('\\') => chars.next().ok_or("trailing escape character")?,
            Some(c) => c,
        };
        first = false;
        re.push_str(&escape_class_member(start));

        // `-` right before the closing bracket is a literal member.
        let mut lookahead = chars.clone();
        if lookahead.next() != Some('-') || matches!(lookahead.peek(), None | Some(']')) {
            continue;
        }
        chars.next();
        let end = match chars.next() {
            Some('\\') => chars.next().ok_or("trailing escape character")?,
            Some(c) => c,
            None => return Err("unterminated character class"),
        };
        if end < start {
            return Err("character range is out of order");
        }
        re.push('-');
        re.push_str(&escape_class_member(end));
    }

    re.push(']');
    Ok(())
}

fn escape_class_member(c: char) -> String {
    match c {
        '[' | ']' | '\\' | '^' | '-' | '&' | '~' => format!("\\{}", c),
        other => other.to_string(),
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<GlobPattern>, ConfigError> {
    patterns.iter().map(|p| GlobPattern::new(p)).collect()
}

/// Decides which containers take part in discovery.
///
/// Exclusion always wins.  When an allow-list is configured, a container
/// must match at least one of its patterns.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    excluded: Vec<GlobPattern>,
    included: Vec<GlobPattern>,
    excluded_labels: Vec<(String, GlobPattern)>,
}

impl ImageFilter {
    pub fn new(
        excluded_images: &[String],
        included_images: &[String],
        excluded_labels: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let excluded_labels = excluded_labels
            .iter()
            .map(|(key, value)| Ok((key.clone(), GlobPattern::new(value)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            excluded: compile_all(excluded_images)?,
            included: compile_all(included_images)?,
            excluded_labels,
        })
    }

    pub fn include(&self, container: &Container) -> bool {
        if self.excluded.iter().any(|p| p.matches(&container.image)) {
            return false;
        }
        let label_excluded = self.excluded_labels.iter().any(|(key, pattern)| {
            container
                .labels
                .get(key)
                .is_some_and(|value| pattern.matches(value))
        });
        if label_excluded {
            return false;
        }
        self.included.is_empty() || self.included.iter().any(|p| p.matches(&container.image))
    }
}
