//! Version and version constraint handling for manifests

use crate::{PackageError, Result};
use std::fmt;

pub use semver::{Version as SemverVersion, VersionReq as SemverVersionReq};

/// Wrapper around semver::Version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub SemverVersion);

/// Wrapper around semver::VersionReq
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionReq(pub SemverVersionReq);

impl Version {
    /// Parse a strict `x.y.z` version string
    pub fn parse(s: &str) -> Result<Self> {
        SemverVersion::parse(s.trim())
            .map(Version)
            .map_err(|_| PackageError::InvalidValue {
                kind: "version",
                value: s.to_string(),
            })
    }

    /// Parse leniently: a leading `v` and missing minor/patch components are
    /// accepted, as are HEP-style zero-padded components such as `6.30.02`
    pub fn parse_lenient(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        let (core, rest) = match trimmed.find(|c: char| c == '-' || c == '+') {
            Some(i) => trimmed.split_at(i),
            None => (trimmed, ""),
        };

        let mut parts = core
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| PackageError::InvalidValue {
                kind: "version",
                value: s.to_string(),
            })?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(PackageError::InvalidValue {
                kind: "version",
                value: s.to_string(),
            });
        }
        parts.resize(3, 0);

        Self::parse(&format!("{}.{}.{}{}", parts[0], parts[1], parts[2], rest))
    }

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(SemverVersion::new(major, minor, patch))
    }

    /// Check if this version satisfies a requirement
    pub fn satisfies(&self, req: &VersionReq) -> bool {
        req.0.matches(&self.0)
    }

    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }
}

impl VersionReq {
    /// Parse a constraint such as `>=3.20`, `==1.5.0` or `>=1.0, <2.0`
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = normalize_version_req(s);

        SemverVersionReq::parse(&normalized)
            .map(VersionReq)
            .map_err(|_| PackageError::InvalidValue {
                kind: "version constraint",
                value: s.to_string(),
            })
    }

    /// Create a version requirement that matches any version
    pub fn any() -> Self {
        VersionReq(SemverVersionReq::STAR)
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.0.matches(&version.0)
    }
}

/// Normalize manifest-style constraints to semver syntax
fn normalize_version_req(s: &str) -> String {
    let trimmed = s.trim();

    if trimmed.is_empty() || trimmed == "latest" || trimmed == "*" {
        return "*".to_string();
    }

    // Ranges like "1.0 - 2.0"
    if let Some((low, high)) = trimmed.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    trimmed
        .split(',')
        .map(|part| {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("==") {
                format!("={}", rest.trim())
            } else if part.starts_with(|c: char| c.is_ascii_digit()) {
                format!("={}", part)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether a version starts with `major.minor.patch`
pub fn is_semver_like(version: &str) -> bool {
    let mut rest = version;
    for i in 0..3 {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        if i < 2 {
            match rest.strip_prefix('.') {
                Some(r) => rest = r,
                None => return false,
            }
        }
    }
    true
}

/// Whether a dependency constraint looks well formed.
///
/// Each comma-separated part is an optional operator followed by a version;
/// zero-padded components such as `>=6.30.02` are accepted.
pub fn is_valid_constraint(constraint: &str) -> bool {
    let trimmed = constraint.trim();
    if trimmed == "*" || trimmed == "latest" {
        return true;
    }

    trimmed.split(',').all(|part| {
        let version = part
            .trim()
            .trim_start_matches(|c: char| matches!(c, '>' | '<' | '=' | '!' | '~' | '^'))
            .trim();
        !version.is_empty() && Version::parse_lenient(version).is_ok()
    })
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(Version::parse_lenient("6.30.02").unwrap(), Version::new(6, 30, 2));
        assert_eq!(Version::parse_lenient("v3.27").unwrap(), Version::new(3, 27, 0));
        assert_eq!(Version::parse_lenient("11").unwrap(), Version::new(11, 0, 0));
        assert!(Version::parse_lenient("1.2.3.4").is_err());
        assert!(Version::parse_lenient("abc").is_err());
        assert!(Version::parse_lenient("1.0.0-rc1").unwrap().is_prerelease());
    }

    #[test]
    fn test_constraints() {
        let req = VersionReq::parse(">=3.20").unwrap();
        assert!(Version::new(3, 27, 0).satisfies(&req));
        assert!(!Version::new(3, 16, 0).satisfies(&req));

        let req = VersionReq::parse(">=1.0.0,<2.0.0").unwrap();
        assert!(req.matches(&Version::new(1, 5, 0)));
        assert!(!req.matches(&Version::new(2, 0, 0)));

        assert!(VersionReq::parse("==1.5.0").unwrap().matches(&Version::new(1, 5, 0)));
        assert!(VersionReq::parse("latest").unwrap().matches(&Version::new(0, 1, 0)));
        assert!(VersionReq::parse("1.0 - 2.0").unwrap().matches(&Version::new(1, 9, 9)));
        assert!(VersionReq::any().matches(&Version::new(9, 9, 9)));
    }

    #[test]
    fn test_format_checks() {
        assert!(is_semver_like("6.30.02"));
        assert!(is_semver_like("1.2.3-beta"));
        assert!(!is_semver_like("1.2"));
        assert!(!is_semver_like("v1.2.3"));

        assert!(is_valid_constraint(">=3.8"));
        assert!(is_valid_constraint("^1.2"));
        assert!(is_valid_constraint(">=6.30.02, <7"));
        assert!(is_valid_constraint("!=1.5.0"));
        assert!(!is_valid_constraint(">=banana"));
        assert!(!is_valid_constraint(">="));
    }
}
