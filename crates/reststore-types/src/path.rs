//! Request path normalization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TypesError;

/// Rule for turning a raw request path into a storage path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathProcessingStrategy {
    /// Use the path as received; only an empty path becomes `/`.
    Unmodified,
    /// Drop `..` segments, collapse repeated slashes and strip the trailing slash.
    #[default]
    Cleaned,
}

impl PathProcessingStrategy {
    /// Apply the strategy to `raw`.
    pub fn process(self, raw: &str) -> String {
        match self {
            PathProcessingStrategy::Unmodified => {
                if raw.is_empty() {
                    "/".to_string()
                } else {
                    raw.to_string()
                }
            }
            PathProcessingStrategy::Cleaned => clean_path(raw),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PathProcessingStrategy::Unmodified => "unmodified",
            PathProcessingStrategy::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for PathProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathProcessingStrategy {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unmodified" => Ok(PathProcessingStrategy::Unmodified),
            "cleaned" => Ok(PathProcessingStrategy::Cleaned),
            _ => Err(TypesError::InvalidPathProcessingStrategy(s.to_string())),
        }
    }
}

/// Remove `..`, collapse `//` and strip a trailing `/`. Empty becomes `/`.
pub fn clean_path(raw: &str) -> String {
    let without_parent = raw.replace("..", "");
    let mut cleaned = String::with_capacity(without_parent.len());
    for c in without_parent.chars() {
        if c == '/' && cleaned.ends_with('/') {
            continue;
        }
        cleaned.push(c);
    }
    while cleaned.len() > 1 && cleaned.ends_with('/') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

/// Picks the strategy for a request from its header, falling back to the
/// configured default.
#[derive(Clone, Copy, Debug, Default)]
pub struct PathProcessingStrategyFinder {
    default: PathProcessingStrategy,
}

impl PathProcessingStrategyFinder {
    pub fn new(default: Option<PathProcessingStrategy>) -> Self {
        Self {
            default: default.unwrap_or_default(),
        }
    }

    pub fn default_strategy(&self) -> PathProcessingStrategy {
        self.default
    }

    /// Strategy named by `header`, or the default when absent or unrecognized.
    pub fn find(&self, header: Option<&str>) -> PathProcessingStrategy {
        match header {
            None => self.default,
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(
                    value,
                    default = %self.default,
                    "unrecognized path processing strategy, using default"
                );
                self.default
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cleaned_collapses_and_strips() {
        let s = PathProcessingStrategy::Cleaned;
        assert_eq!(s.process("/a//b///c/"), "/a/b/c");
        assert_eq!(s.process("/a/../b"), "/a/b");
        assert_eq!(s.process(""), "/");
        assert_eq!(s.process("/"), "/");
        assert_eq!(s.process("//"), "/");
    }

    #[test]
    fn unmodified_keeps_path() {
        let s = PathProcessingStrategy::Unmodified;
        assert_eq!(s.process("/a//b/"), "/a//b/");
        assert_eq!(s.process(""), "/");
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            "UNMODIFIED".parse::<PathProcessingStrategy>().unwrap(),
            PathProcessingStrategy::Unmodified
        );
        assert_eq!(
            "Cleaned".parse::<PathProcessingStrategy>().unwrap(),
            PathProcessingStrategy::Cleaned
        );
        assert!("tidy".parse::<PathProcessingStrategy>().is_err());
    }

    #[test]
    fn finder_falls_back_to_default() {
        let finder = PathProcessingStrategyFinder::new(Some(PathProcessingStrategy::Unmodified));
        assert_eq!(finder.find(None), PathProcessingStrategy::Unmodified);
        assert_eq!(finder.find(Some("bogus")), PathProcessingStrategy::Unmodified);
        assert_eq!(finder.find(Some("cleaned")), PathProcessingStrategy::Cleaned);

        let finder = PathProcessingStrategyFinder::new(None);
        assert_eq!(finder.default_strategy(), PathProcessingStrategy::Cleaned);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&PathProcessingStrategy::Unmodified).unwrap();
        assert_eq!(json, "\"unmodified\"");
    }

    proptest! {
        #[test]
        fn cleaning_is_idempotent(raw in "[a-z/.]{0,24}") {
            let once = clean_path(&raw);
            prop_assert_eq!(clean_path(&once), once.clone());
            prop_assert!(!once.contains("//"));
            prop_assert!(once == "/" || !once.ends_with('/'));
        }
    }
}
