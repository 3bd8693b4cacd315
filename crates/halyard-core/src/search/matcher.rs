//! Pattern matching for auto-search items.

use regex::Regex;
use tracing::warn;

/// How a pattern is applied to a candidate string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MatchMethod {
    /// Every whitespace-separated token of the pattern must occur in
    /// the candidate, case-insensitively.
    #[default]
    Partial = 0,
    /// Case-sensitive equality.
    Exact = 1,
    /// Unanchored regular expression search.
    Regex = 2,
    /// `*`/`?` glob over the whole candidate, case-insensitive.
    Wildcard = 3,
}

impl MatchMethod {
    /// Map a persisted discriminant back to a method.
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Partial),
            1 => Some(Self::Exact),
            2 => Some(Self::Regex),
            3 => Some(Self::Wildcard),
            _ => None,
        }
    }
}

/// A prepared pattern matcher.
///
/// Compilation happens once at construction; a pattern that fails to
/// compile is logged and never matches.
#[derive(Debug, Clone)]
pub struct StringMatcher {
    method: MatchMethod,
    pattern: String,
    tokens: Vec<String>,
    compiled: Option<Regex>,
}

impl StringMatcher {
    /// Build a matcher for `pattern` using `method`.
    pub fn new(method: MatchMethod, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let mut matcher = StringMatcher {
            method,
            pattern,
            tokens: Vec::new(),
            compiled: None,
        };
        matcher.prepare();
        matcher
    }

    /// A wildcard matcher, the form used for nick filters.
    pub fn wildcard(pattern: impl Into<String>) -> Self {
        Self::new(MatchMethod::Wildcard, pattern)
    }

    pub fn method(&self) -> MatchMethod {
        self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern is empty (an unset filter).
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Apply the pattern to a candidate string.
    pub fn matches(&self, candidate: &str) -> bool {
        match self.method {
            MatchMethod::Partial => {
                let lower = candidate.to_lowercase();
                self.tokens.iter().all(|t| lower.contains(t.as_str()))
            }
            MatchMethod::Exact => candidate == self.pattern,
            MatchMethod::Regex | MatchMethod::Wildcard => self
                .compiled
                .as_ref()
                .is_some_and(|re| re.is_match(candidate)),
        }
    }

    fn prepare(&mut self) {
        self.tokens.clear();
        self.compiled = None;
        match self.method {
            MatchMethod::Partial => {
                self.tokens = self
                    .pattern
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect();
            }
            MatchMethod::Exact => {}
            MatchMethod::Regex => match Regex::new(&self.pattern) {
                Ok(re) => self.compiled = Some(re),
                Err(err) => {
                    warn!(pattern = %self.pattern, %err, "Invalid regex pattern, matcher disabled");
                }
            },
            MatchMethod::Wildcard => {
                let expr = wildcard_to_regex(&self.pattern);
                match Regex::new(&expr) {
                    Ok(re) => self.compiled = Some(re),
                    Err(err) => {
                        warn!(pattern = %self.pattern, %err, "Invalid wildcard pattern, matcher disabled");
                    }
                }
            }
        }
    }
}

/// Translate a `*`/`?` glob into an anchored, case-insensitive regex.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    expr
}
