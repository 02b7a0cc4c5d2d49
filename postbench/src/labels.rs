//! Label sets identifying series in a block.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `name="value"` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// The label name.
    pub name: String,
    /// The label value.
    pub value: String,
}

/// A set of labels sorted by name, with unique names.
///
/// Sorting makes label sets comparable and gives the index writer the series
/// order the format requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds a label set from `(name, value)` pairs.
    ///
    /// Pairs are sorted by name; for a repeated name the last value wins.
    /// Pairs with an empty value are dropped, since an empty value is
    /// equivalent to the label not being set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use postbench::labels::Labels;
    ///
    /// let labels = Labels::from_pairs([("pod", "abc-1"), ("job", "api")]);
    /// assert_eq!(labels.get("pod"), Some("abc-1"));
    /// assert_eq!(labels.to_string(), r#"{job="api", pod="abc-1"}"#);
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = Vec::new();
        for (name, value) in pairs {
            let (name, value) = (name.into(), value.into());
            labels.retain(|l| l.name != name);
            if !value.is_empty() {
                labels.push(Label { name, value });
            }
        }
        labels.sort();
        Self(labels)
    }

    /// Returns the value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    /// Iterates the labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Number of labels in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set has no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        f.write_str("}")
    }
}
