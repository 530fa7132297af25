//! Version parsing and `require` constraint evaluation.
//!
//! Package versions are strict `major.minor.patch` triplets; constraints use
//! semver requirement syntax with `||` alternatives.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};

static TRIPLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+$").expect("valid version regex"));
// `>= 1.2` -> `>=1.2`, so whitespace can then act as a conjunction separator.
static OPERATOR_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([<>=~^]+)\s+").expect("valid operator regex"));

/// Returns whether `value` is a plain `major.minor.patch` triplet that
/// semver accepts (ASCII digits, no leading zeros).
pub fn is_semver_triplet(value: &str) -> bool {
    TRIPLET_RE.is_match(value) && Version::parse(value).is_ok()
}

/// Parses a strict version triplet; pre-release and build suffixes are rejected.
pub fn parse_version(value: &str) -> Option<Version> {
    let trimmed = value.trim();
    if !is_semver_triplet(trimmed) {
        return None;
    }
    Version::parse(trimmed).ok()
}

/// A parsed `require` constraint: any alternative may match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    /// Parses `>=1.0.0`, `^1.2`, `~2.0`, `*`, `>=1.0 <2.0`, `^1.0 || ^2.0`.
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let mut alternatives = Vec::new();
        for alternative in raw.split("||") {
            let compact = OPERATOR_GAP_RE.replace_all(alternative.trim(), "$1");
            let joined = compact
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            if joined.is_empty() {
                alternatives.push(VersionReq::STAR);
                continue;
            }
            alternatives.push(VersionReq::parse(&joined)?);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
