//! Ant-style path patterns compiled to anchored regular expressions.
//!
//! | token    | matches                                   |
//! |----------|-------------------------------------------|
//! | `**`     | any number of whole segments, incl. none  |
//! | `*`      | any run of characters inside one segment  |
//! | `?`      | exactly one character other than `/`      |
//! | `{name}` | one non-empty segment                     |
//!
//! Everything else is literal. Compilation happens once per snapshot build;
//! matching on the request path is a single regex test.
use std::fmt;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Unclosed '{{' in pattern '{0}'")]
    UnclosedVariable(String),
    #[error("Empty variable name in pattern '{0}'")]
    EmptyVariable(String),
    #[error("Pattern '{pattern}' failed to compile: {message}")]
    Regex { pattern: String, message: String },
}

#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    strip_prefix: String,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut expr = String::with_capacity(pattern.len() * 2 + 2);
        expr.push('^');

        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                // `/**` followed by end or `/` also matches the bare parent.
                '/' if chars.get(i + 1) == Some(&'*')
                    && chars.get(i + 2) == Some(&'*')
                    && matches!(chars.get(i + 3), None | Some('/')) =>
                {
                    expr.push_str("(?:/.*)?");
                    i += 3;
                }
                '*' if chars.get(i + 1) == Some(&'*') => {
                    expr.push_str(".*");
                    i += 2;
                }
                '*' => {
                    expr.push_str("[^/]*");
                    i += 1;
                }
                '?' => {
                    expr.push_str("[^/]");
                    i += 1;
                }
                '{' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == '}')
                        .map(|offset| i + offset)
                        .ok_or_else(|| PatternError::UnclosedVariable(pattern.to_string()))?;
                    if close == i + 1 {
                        return Err(PatternError::EmptyVariable(pattern.to_string()));
                    }
                    expr.push_str("[^/]+");
                    i = close + 1;
                }
                c => {
                    let mut buf = [0u8; 4];
                    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                    i += 1;
                }
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| PatternError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            strip_prefix: literal_prefix(pattern),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Ordering key: longer patterns are more specific.
    pub fn specificity(&self) -> usize {
        self.source.chars().count()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The literal portion removed by `stripPrefix` routes.
    pub fn strip_prefix(&self) -> &str {
        &self.strip_prefix
    }

    /// Remove the literal prefix from `path`, always yielding a path that
    /// starts with `/`. Paths that do not start with the prefix are returned
    /// unchanged.
    pub fn strip<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        use std::borrow::Cow;

        match path.strip_prefix(self.strip_prefix.as_str()) {
            Some("") => Cow::Borrowed("/"),
            Some(rest) if rest.starts_with('/') => Cow::Borrowed(rest),
            Some(rest) => Cow::Owned(format!("/{rest}")),
            None => Cow::Borrowed(path),
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

/// Literal text before the first `*` or `{`, minus one trailing `/`.
fn literal_prefix(pattern: &str) -> String {
    let end = pattern.find(['*', '{']).unwrap_or(pattern.len());
    let prefix = &pattern[..end];
    prefix.strip_suffix('/').unwrap_or(prefix).to_string()
}
