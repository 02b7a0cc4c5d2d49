//! Label matchers: predicates over the value of a single label.
//!
//! Regular expressions are fully anchored, so `pod=~"abc.*"` matches `abc-1`
//! but not `xabc`. A label that is not set on a series is treated as having
//! the empty value, which is why [`Matcher::matches`] is also asked about `""`
//! when compiling matchers into postings.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MatcherError};

/// Characters with a special meaning in a regex. A value without any of them
/// matches only itself.
const META_CHARS: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// The comparison a [`Matcher`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    /// `name="value"`
    #[serde(rename = "=", alias = "equal")]
    Equal,
    /// `name!="value"`
    #[serde(rename = "!=", alias = "not_equal")]
    NotEqual,
    /// `name=~"regex"`
    #[serde(rename = "=~", alias = "regexp")]
    Regexp,
    /// `name!~"regex"`
    #[serde(rename = "!~", alias = "not_regexp")]
    NotRegexp,
}

impl MatchType {
    /// Returns the operator string, e.g. `=~`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regexp => "=~",
            Self::NotRegexp => "!~",
        }
    }

    /// Returns `true` for the negated kinds (`!=`, `!~`).
    pub fn is_negated(self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegexp)
    }

    fn inverse(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Regexp => Self::NotRegexp,
            Self::NotRegexp => Self::Regexp,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "equal" => Ok(Self::Equal),
            "!=" | "not_equal" => Ok(Self::NotEqual),
            "=~" | "regexp" => Ok(Self::Regexp),
            "!~" | "not_regexp" => Ok(Self::NotRegexp),
            other => Err(ConfigError::UnknownMatchType(other.to_string())),
        }
    }
}

/// An immutable predicate over one label's value.
///
/// Building a matcher compiles its regex once; the matcher can then be reused
/// for any number of queries.
#[derive(Debug, Clone)]
pub struct Matcher {
    kind: MatchType,
    name: String,
    value: String,
    re: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling `value` as an anchored regex for the
    /// regex kinds.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::InvalidRegex`] if `value` is not a valid
    /// regular expression.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use postbench::matcher::{MatchType, Matcher};
    ///
    /// let m = Matcher::new(MatchType::Regexp, "pod", "^abc.*$")?;
    /// assert!(m.matches("abc-7f9c"));
    /// assert!(!m.matches("xabc"));
    /// # Ok::<(), postbench::error::MatcherError>(())
    /// ```
    pub fn new(
        kind: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let name = name.into();
        let value = value.into();
        let re = match kind {
            MatchType::Regexp | MatchType::NotRegexp => Some(
                Regex::new(&format!("^(?:{value})$")).map_err(|source| {
                    MatcherError::InvalidRegex {
                        name: name.clone(),
                        pattern: value.clone(),
                        source,
                    }
                })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            kind,
            name,
            value,
            re,
        })
    }

    /// The comparison kind.
    pub fn kind(&self) -> MatchType {
        self.kind
    }

    /// The label name this matcher applies to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value or pattern as given.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Tests a label value. An unset label is tested as `""`.
    pub fn matches(&self, v: &str) -> bool {
        let re_match = || self.re.as_ref().is_some_and(|re| re.is_match(v));
        match self.kind {
            MatchType::Equal => v == self.value,
            MatchType::NotEqual => v != self.value,
            MatchType::Regexp => re_match(),
            MatchType::NotRegexp => !re_match(),
        }
    }

    /// Returns the matcher with the opposite kind and the same name and value.
    pub fn inverse(&self) -> Self {
        Self {
            kind: self.kind.inverse(),
            name: self.name.clone(),
            value: self.value.clone(),
            re: self.re.clone(),
        }
    }

    /// For a `=~` matcher that is a plain alternation of literals (`a|b|c`),
    /// returns the literals so they can be looked up directly instead of
    /// scanning every value of the label.
    pub fn set_matches(&self) -> Option<Vec<String>> {
        if self.kind != MatchType::Regexp {
            return None;
        }
        let parts: Vec<&str> = self.value.split('|').collect();
        let literal = |p: &&str| !p.is_empty() && !p.contains(META_CHARS);
        if parts.iter().all(literal) {
            let mut set: Vec<String> = parts.into_iter().map(str::to_string).collect();
            set.sort();
            set.dedup();
            Some(set)
        } else {
            None
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind, self.value)
    }
}
