//! Two-component versions and the constraints attached to dependencies.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version format: {0}")]
    InvalidVersionFormat(String),
}

/// A `major.minor` version. Ordering is lexicographic on `(major, minor)`.
///
/// The digit count of each component is kept as parsed, so a version read as
/// `1.02` displays (and names remote paths) as `1.02`. Equality and ordering
/// are numeric: `1.02 == 1.2`.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    major_width: usize,
    minor_width: usize,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            major_width: 1,
            minor_width: 1,
        }
    }

    fn key(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersionFormat(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: parse_component(major).ok_or_else(invalid)?,
            minor: parse_component(minor).ok_or_else(invalid)?,
            major_width: major.len(),
            minor_width: minor.len(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0mw$}.{:0nw$}",
            self.major,
            self.minor,
            mw = self.major_width,
            nw = self.minor_width
        )
    }
}

// `u32::from_str` accepts a leading '+'; components are plain digits only.
fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    let a: Version = a.parse()?;
    let b: Version = b.parse()?;
    Ok(a.cmp(&b))
}

/// Which way a constraint bounds the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Exact,
    LessOrEqual,
    GreaterOrEqual,
}

/// Classify a raw constraint by its textual prefix.
pub fn classify(raw: &str) -> ConstraintKind {
    if raw.starts_with("<=") {
        ConstraintKind::LessOrEqual
    } else if raw.starts_with(">=") {
        ConstraintKind::GreaterOrEqual
    } else {
        ConstraintKind::Exact
    }
}

/// Drop the comparison prefix of a raw constraint.
pub fn strip_prefix(raw: &str) -> &str {
    raw.trim_start_matches(['<', '>', '='])
}

/// Version constraint of a dependency entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Whatever the remote "latest" link points at
    #[default]
    Latest,
    Exact(Version),
    AtMost(Version),
    AtLeast(Version),
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Ok(Self::Latest);
        }
        let version: Version = strip_prefix(raw).parse()?;
        Ok(match classify(raw) {
            ConstraintKind::Exact => Self::Exact(version),
            ConstraintKind::LessOrEqual => Self::AtMost(version),
            ConstraintKind::GreaterOrEqual => Self::AtLeast(version),
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(v) => write!(f, "{}", v),
            Self::AtMost(v) => write!(f, "<={}", v),
            Self::AtLeast(v) => write!(f, ">={}", v),
        }
    }
}
