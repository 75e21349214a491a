use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bundle::INITIAL_VERSION;
use crate::errors::{BundleError, BundleResult};

/// Identifier of a migration step, and of the schema version a bundle is at.
///
/// Keys look like `"175-refactor-data-model"` or just `"109"`: the numeric
/// prefix is the ordering index and the optional suffix is descriptive.
/// Versions compare by index.
///
/// ```
/// use bundle_store::migration::MigrationVersion;
///
/// let v: MigrationVersion = "175-refactor-data-model".parse().unwrap();
/// assert_eq!(v.index(), 175);
/// assert_eq!(v.to_string(), "175-refactor-data-model");
/// assert!(v > "109".parse().unwrap());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationVersion {
    index: u64,
    key: String,
}

impl MigrationVersion {
    pub fn parse(key: &str) -> BundleResult<Self> {
        let digits = key.len() - key.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, rest) = key.split_at(digits);
        let valid_suffix = rest.is_empty() || (rest.len() > 1 && rest.starts_with('-'));
        if prefix.is_empty() || !valid_suffix {
            return Err(BundleError::InvalidVersion(key.to_string()));
        }
        let index = prefix
            .parse::<u64>()
            .map_err(|_| BundleError::InvalidVersion(key.to_string()))?;
        Ok(Self {
            index,
            key: key.to_string(),
        })
    }

    /// The version of a bundle no migration has run on.
    pub fn initial() -> Self {
        Self {
            index: 0,
            key: INITIAL_VERSION.to_string(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_initial(&self) -> bool {
        self.index == 0
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for MigrationVersion {}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl std::hash::Hash for MigrationVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl FromStr for MigrationVersion {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MigrationVersion {
    type Error = BundleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MigrationVersion> for String {
    fn from(version: MigrationVersion) -> Self {
        version.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_prefix() {
        assert_eq!(MigrationVersion::parse("109").unwrap().index(), 109);
        assert_eq!(
            MigrationVersion::parse("175-refactor-data-model").unwrap().index(),
            175
        );
        assert!(MigrationVersion::initial().is_initial());
        assert_eq!(MigrationVersion::parse("0").unwrap(), MigrationVersion::initial());
    }

    #[test]
    fn rejects_keys_without_index() {
        for key in ["", "refactor", "12refactor", "12-", "-12"] {
            assert!(
                matches!(MigrationVersion::parse(key), Err(BundleError::InvalidVersion(_))),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn orders_by_index_not_text() {
        let mut versions: Vec<MigrationVersion> = ["121", "9-early", "111-names"]
            .iter()
            .map(|k| k.parse().unwrap())
            .collect();
        versions.sort();
        let keys: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["9-early", "111-names", "121"]);
    }
}
