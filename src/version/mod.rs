//! Release versions parsed from repository tags.
//!
//! A tag like `v1.2.3` keeps two forms: the original *friendly* string
//! used to look up the git ref, and a canonical numeric tuple used for
//! ordering. `Version(parse(s)).friendly() == s` for every recognized tag.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A 2-4 component dotted version, e.g. `1.2` .. `1.2.3.4`.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Version {
    friendly: String,
    numeric: [u64; 4],
}

impl Version {
    /// Parse a tag such as `v1.2.3`, `ver2.0`, or `1.0.0.1`. Accepts an
    /// optional leading `v` or `ver` prefix, stripped once. Requires
    /// 2-4 dotted integer components.
    pub fn parse(tag: &str) -> Option<Self> {
        let stripped = tag
            .strip_prefix("ver")
            .or_else(|| tag.strip_prefix('v'))
            .unwrap_or(tag);

        let parts: Vec<&str> = stripped.split('.').collect();
        if !(2..=4).contains(&parts.len()) {
            return None;
        }

        let mut numeric = [0u64; 4];
        for (i, part) in parts.iter().enumerate() {
            numeric[i] = part.parse().ok()?;
        }

        Some(Self {
            friendly: tag.to_string(),
            numeric,
        })
    }

    pub fn friendly(&self) -> &str {
        &self.friendly
    }

    pub fn numeric(&self) -> [u64; 4] {
        self.numeric
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.numeric == other.numeric
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric.cmp(&other.numeric)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.numeric.hash(state);
    }
}

/// Sort tags descending by numeric order, ignoring unparseable entries.
/// Pre-sizes the result for large tag counts.
pub fn sorted_versions_descending(tags: impl IntoIterator<Item = String>) -> Vec<Version> {
    let iter = tags.into_iter();
    let (lower, _) = iter.size_hint();
    let mut versions = Vec::with_capacity(lower);
    for tag in iter {
        if let Some(v) = Version::parse(&tag) {
            versions.push(v);
        }
    }
    versions.sort_by(|a, b| b.cmp(a));
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v_prefix() {
        let v = Version::parse("v1.2.3").unwrap();
        assert_eq!(v.friendly(), "v1.2.3");
        assert_eq!(v.numeric(), [1, 2, 3, 0]);
    }

    #[test]
    fn parses_ver_prefix() {
        let v = Version::parse("ver2.0").unwrap();
        assert_eq!(v.numeric(), [2, 0, 0, 0]);
    }

    #[test]
    fn parses_bare() {
        let v = Version::parse("1.0.0.1").unwrap();
        assert_eq!(v.numeric(), [1, 0, 0, 1]);
    }

    #[test]
    fn rejects_single_component() {
        assert!(Version::parse("v1").is_none());
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(Version::parse("v1.2.x").is_none());
        assert!(Version::parse("latest").is_none());
    }

    #[test]
    fn friendly_round_trips() {
        for s in ["v1.0.0", "ver2.3", "3.4.5.6", "v0.1"] {
            assert_eq!(Version::parse(s).unwrap().friendly(), s);
        }
    }

    #[test]
    fn orders_numerically_not_lexically() {
        let a = Version::parse("v1.9.0").unwrap();
        let b = Version::parse("v1.10.0").unwrap();
        assert!(a < b);
    }

    #[test]
    fn sorts_descending_and_skips_unparseable() {
        let tags = vec![
            "v1.0.0".to_string(),
            "latest".to_string(),
            "v2.0.0".to_string(),
            "v1.5.0".to_string(),
        ];
        let sorted = sorted_versions_descending(tags);
        let friendly: Vec<&str> = sorted.iter().map(|v| v.friendly()).collect();
        assert_eq!(friendly, vec!["v2.0.0", "v1.5.0", "v1.0.0"]);
    }
}
