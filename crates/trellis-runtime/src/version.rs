//! Minimal semantic-version comparator.
//!
//! Only what dependency resolution needs: `major.minor.patch` with an optional
//! pre-release tag, and constraint lists of the form `>=1.0.0, <2.0.0`.
//! Build metadata (`+...`) is accepted and ignored.

use crate::error::{RuntimeError, RuntimeResult};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed version number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<PreRelease>,
}

/// One dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PreRelease {
    Numeric(u64),
    Alpha(String),
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    /// Parse a version string.
    ///
    /// Accepts `1.2`, `1.2.3`, `v1.2.3`, `1.2.3-beta.1` and `1.2.3+build`.
    /// A missing patch component is treated as `0`.
    pub fn parse(version: &str) -> RuntimeResult<Self> {
        let invalid = || RuntimeError::InvalidVersion(version.to_string());

        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let without_build = trimmed.split('+').next().unwrap_or(trimmed);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (without_build, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }

        let number = |s: &str| -> RuntimeResult<u64> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse().map_err(|_| invalid())
        };

        let major = number(parts[0])?;
        let minor = number(parts[1])?;
        let patch = match parts.get(2) {
            Some(p) => number(p)?,
            None => 0,
        };

        let pre = match pre {
            Some(tag) => {
                if tag.is_empty() {
                    return Err(invalid());
                }
                tag.split('.')
                    .map(|ident| {
                        if ident.is_empty() {
                            Err(invalid())
                        } else if ident.bytes().all(|b| b.is_ascii_digit()) {
                            ident.parse().map(PreRelease::Numeric).map_err(|_| invalid())
                        } else {
                            Ok(PreRelease::Alpha(ident.to_string()))
                        }
                    })
                    .collect::<RuntimeResult<Vec<_>>>()?
            }
            None => Vec::new(),
        };

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// Whether this is a pre-release version.
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl FromStr for Version {
    type Err = RuntimeError;

    fn from_str(s: &str) -> RuntimeResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let tags: Vec<String> = self.pre.iter().map(ToString::to_string).collect();
            write!(f, "-{}", tags.join("."))?;
        }
        Ok(())
    }
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Numeric(n) => write!(f, "{n}"),
            PreRelease::Alpha(s) => f.write_str(s),
        }
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreRelease::Numeric(a), PreRelease::Numeric(b)) => a.cmp(b),
            (PreRelease::Numeric(_), PreRelease::Alpha(_)) => Ordering::Less,
            (PreRelease::Alpha(_), PreRelease::Numeric(_)) => Ordering::Greater,
            (PreRelease::Alpha(a), PreRelease::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                // A release outranks any of its pre-releases.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

/// Comparison operator of a single clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Exact => "=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
        }
    }
}

/// A single `op version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub op: Op,
    pub version: Version,
}

impl Clause {
    fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Exact => version == &self.version,
            Op::Greater => version > &self.version,
            Op::GreaterEq => version >= &self.version,
            Op::Less => version < &self.version,
            Op::LessEq => version <= &self.version,
        }
    }
}

/// A conjunction of clauses. An empty constraint matches every version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    /// A constraint that accepts anything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a comma-separated constraint list.
    ///
    /// `""` and `"*"` match anything. A bare version means exact match.
    pub fn parse(constraint: &str) -> RuntimeResult<Self> {
        let trimmed = constraint.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }

        let clauses = trimmed
            .split(',')
            .map(|raw| Self::parse_clause(constraint, raw.trim()))
            .collect::<RuntimeResult<Vec<_>>>()?;

        Ok(Self { clauses })
    }

    fn parse_clause(constraint: &str, raw: &str) -> RuntimeResult<Clause> {
        let invalid = |reason: &str| RuntimeError::InvalidConstraint {
            constraint: constraint.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty clause"));
        }

        // Two-character operators must be tried before their prefixes.
        let (op, rest) = if let Some(rest) = raw.strip_prefix(">=") {
            (Op::GreaterEq, rest)
        } else if let Some(rest) = raw.strip_prefix("<=") {
            (Op::LessEq, rest)
        } else if let Some(rest) = raw.strip_prefix('>') {
            (Op::Greater, rest)
        } else if let Some(rest) = raw.strip_prefix('<') {
            (Op::Less, rest)
        } else if let Some(rest) = raw.strip_prefix('=') {
            (Op::Exact, rest)
        } else {
            (Op::Exact, raw)
        };

        let version = Version::parse(rest.trim())
            .map_err(|_| invalid(&format!("'{}' is not a version", rest.trim())))?;

        Ok(Clause { op, version })
    }

    /// Whether `version` satisfies every clause.
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    /// Whether this constraint accepts any version.
    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

impl FromStr for VersionConstraint {
    type Err = RuntimeError;

    fn from_str(s: &str) -> RuntimeResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("*");
        }
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.op.as_str(), c.version))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Check a version string against a constraint string.
///
/// Unparseable versions or constraints never satisfy.
pub fn satisfies(version: &str, constraint: &str) -> bool {
    let Ok(constraint) = VersionConstraint::parse(constraint) else {
        return false;
    };
    if constraint.is_any() {
        return true;
    }
    Version::parse(version)
        .map(|v| constraint.matches(&v))
        .unwrap_or(false)
}
