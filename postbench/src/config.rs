//! Benchmark configuration.
//!
//! The defaults reproduce the classic query: `pod=~"^abc.*$"` run once per
//! two-hour block over a seven-day range.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MatcherError};
use crate::matcher::{MatchType, Matcher};

/// Days covered by the default query range.
const DAYS: u32 = 7;

/// Two-hour blocks per day.
const TWO_HOUR_BLOCKS_PER_DAY: u32 = 12;

/// One query per two-hour block over seven days.
pub const DEFAULT_REPETITIONS: u32 = DAYS * TWO_HOUR_BLOCKS_PER_DAY;

/// Label name matched by default.
pub const DEFAULT_FIELD: &str = "pod";

/// Pattern matched by default.
pub const DEFAULT_PATTERN: &str = "^abc.*$";

/// The query a run measures and how often it is repeated.
///
/// Missing fields take their defaults when deserialized, so a config file
/// only needs the values it changes. Unknown keys are rejected:
///
/// ```rust
/// use postbench::config::BenchConfig;
/// use postbench::matcher::MatchType;
///
/// let config: BenchConfig = serde_json::from_str(r#"{"field": "job", "matcher_kind": "="}"#)?;
/// assert_eq!(config.field, "job");
/// assert_eq!(config.matcher_kind, MatchType::Equal);
/// assert_eq!(config.repetitions, 84);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Label name to match.
    pub field: String,
    /// Value or regular expression to match against.
    pub pattern: String,
    /// Comparison kind.
    pub matcher_kind: MatchType,
    /// Number of times the query is executed.
    pub repetitions: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            field: DEFAULT_FIELD.to_string(),
            pattern: DEFAULT_PATTERN.to_string(),
            matcher_kind: MatchType::Regexp,
            repetitions: DEFAULT_REPETITIONS,
        }
    }
}

impl BenchConfig {
    /// Reads a JSON config file.
    ///
    /// The result is not validated; call [`BenchConfig::validate`] after
    /// applying any overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be read or is not a valid config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the field is empty or `repetitions` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.field.is_empty() {
            return Err(ConfigError::EmptyField);
        }
        if self.repetitions == 0 {
            return Err(ConfigError::InvalidRepetitions {
                count: self.repetitions,
            });
        }
        Ok(())
    }

    /// Builds the configured matcher.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError`] if the pattern is not a valid regular
    /// expression.
    pub fn matcher(&self) -> Result<Matcher, MatcherError> {
        Matcher::new(self.matcher_kind, self.field.as_str(), self.pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.repetitions, 84);
        assert_eq!(config.matcher().unwrap().to_string(), r#"pod=~"^abc.*$""#);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_repetitions_and_empty_field() {
        let config = BenchConfig {
            repetitions: 0,
            ..BenchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRepetitions { count: 0 })
        ));

        let config = BenchConfig {
            field: String::new(),
            ..BenchConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyField)));
    }

    #[test]
    fn test_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.json");
        fs::write(&path, r#"{"pattern": "abc-1", "matcher_kind": "!=", "repetitions": 3}"#)
            .unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.field, "pod");
        assert_eq!(config.pattern, "abc-1");
        assert_eq!(config.matcher_kind, MatchType::NotEqual);
        assert_eq!(config.repetitions, 3);

        fs::write(&path, r#"{"repetitions": "many"}"#).unwrap();
        assert!(matches!(
            BenchConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        fs::write(&path, r#"{"repetition": 3}"#).unwrap();
        assert!(matches!(
            BenchConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            BenchConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
