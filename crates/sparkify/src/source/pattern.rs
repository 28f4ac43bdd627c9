//! Glob-style path patterns relative to the source root.
//!
//! `*` matches within one path segment, `?` matches one character, `**`
//! spans any number of segments, `[abc]`/`[!abc]` are character classes and
//! `{a,b}` is alternation. Everything else is literal.

use regex::Regex;
use snafu::prelude::*;

use crate::error::{InvalidPatternSnafu, SourceError};

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    prefix: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, SourceError> {
        let trimmed = pattern.trim_start_matches('/');
        let regex = Regex::new(&glob_to_regex(trimmed)).context(InvalidPatternSnafu {
            pattern: pattern.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            prefix: literal_prefix(trimmed),
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Longest leading run of literal directory segments. Listing starts here.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Label for metrics and logs: the first literal segment, or the raw
    /// pattern when it starts with a wildcard.
    pub fn dataset(&self) -> &str {
        self.prefix
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.raw)
    }

    /// True when `path` (relative to the root) matches the pattern.
    ///
    /// Files whose name starts with `_` or `.` are never matched, so job
    /// markers and editor droppings next to the data are skipped.
    pub fn matches(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        if name.starts_with('_') || name.starts_with('.') {
            return false;
        }
        self.regex.is_match(path)
    }
}

fn literal_prefix(pattern: &str) -> String {
    let segments: Vec<&str> = pattern.split('/').collect();
    // The final segment names files, never a directory to list from.
    let dirs = &segments[..segments.len().saturating_sub(1)];
    dirs.iter()
        .take_while(|segment| !segment.contains(GLOB_CHARS))
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut re = String::with_capacity(glob.len() * 2 + 2);
    re.push('^');

    let mut in_group = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:[^/]+/)*");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    re.push('[');
                    let class = &chars[i + 1..i + 1 + len];
                    let (negated, class) = match class.split_first() {
                        Some((&'!', rest)) | Some((&'^', rest)) => (true, rest),
                        _ => (false, class),
                    };
                    if negated {
                        re.push('^');
                    }
                    for &c in class {
                        if c == '-' {
                            re.push('-');
                        } else {
                            re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                        }
                    }
                    re.push(']');
                    i += len + 2;
                    continue;
                }
                _ => re.push_str(r"\["),
            },
            '{' if !in_group => {
                re.push_str("(?:");
                in_group = true;
            }
            '}' if in_group => {
                re.push(')');
                in_group = false;
            }
            ',' if in_group => re.push('|'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }

    re.push('$');
    re
}
