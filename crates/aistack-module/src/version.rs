//! Module versions and version constraints.
//!
//! Versions are `MAJOR[.MINOR[.PATCH]]` with missing segments defaulting to
//! zero, so `"2"`, `"2.0"` and `"2.0.0"` are equal.  Constraints are an
//! optional operator followed by a version: `">=1.2"`, `"!= 3.0.1"`, `"1.0"`
//! (operator defaults to `=`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ModuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `MAJOR[.MINOR[.PATCH]]`.
    ///
    /// ```
    /// use aistack_module::version::Version;
    ///
    /// assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
    /// assert!(Version::parse("1.2.3.4").is_err());
    /// assert!(Version::parse("v1").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self, ModuleError> {
        let invalid = || ModuleError::InvalidVersion(value.to_string());
        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }
        let mut segments = [0u64; 3];
        for (slot, part) in segments.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(segments[0], segments[1], segments[2]))
    }
}

impl FromStr for Version {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Constraints
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    // Longest symbols first so `>=` is not read as `>`.
    const SYMBOLS: [(&'static str, Operator); 7] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("=", Operator::Eq),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
        }
    }
}

/// An operator and a target version.
///
/// ```
/// use aistack_module::version::{Version, VersionConstraint};
///
/// let c = VersionConstraint::parse(">=2.0.0").unwrap();
/// assert!(c.matches(&Version::new(2, 0, 0)));
/// assert!(!c.matches(&Version::new(1, 9, 9)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    pub operator: Operator,
    pub version: Version,
}

impl VersionConstraint {
    pub fn new(operator: Operator, version: Version) -> Self {
        Self { operator, version }
    }

    pub fn parse(value: &str) -> Result<Self, ModuleError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ModuleError::InvalidConstraint(value.to_string()));
        }
        let (operator, rest) = Operator::SYMBOLS
            .iter()
            .find_map(|(symbol, op)| trimmed.strip_prefix(symbol).map(|rest| (*op, rest)))
            .unwrap_or((Operator::Eq, trimmed));
        let version = Version::parse(rest.trim_start())
            .map_err(|_| ModuleError::InvalidConstraint(value.to_string()))?;
        Ok(Self::new(operator, version))
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.operator.accepts(version.cmp(&self.version))
    }
}

impl FromStr for VersionConstraint {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.symbol(), self.version)
    }
}

/// Split a dependency reference such as `"python@>=3.10"` into its name and
/// optional constraint.
pub fn parse_module_dependency(
    value: &str,
) -> Result<(String, Option<VersionConstraint>), ModuleError> {
    let (name, constraint) = match value.split_once('@') {
        Some((name, constraint)) => (name.trim(), Some(constraint)),
        None => (value.trim(), None),
    };
    if name.is_empty() {
        return Err(ModuleError::MissingName);
    }
    let constraint = constraint.map(VersionConstraint::parse).transpose()?;
    Ok((name.to_string(), constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn missing_segments_default_to_zero() {
        assert_eq!(v("3"), Version::new(3, 0, 0));
        assert_eq!(v("3.1"), Version::new(3, 1, 0));
        assert_eq!(v("3"), v("3.0.0"));
    }

    #[test]
    fn ordering_is_numeric_per_segment() {
        assert!(v("1.9.9") < v("2.0.0"));
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("0.0.2") > v("0.0.1"));
        assert_eq!(v("1.2.3").cmp(&v("1.2.3")), Ordering::Equal);
    }

    #[test]
    fn malformed_versions_are_rejected() {
        for bad in ["", "1.", ".1", "1..2", "1.2.3.4", "1.a", "v1.0", "-1", " 1"] {
            assert!(
                matches!(Version::parse(bad), Err(ModuleError::InvalidVersion(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_is_three_segments() {
        assert_eq!(v("4.2").to_string(), "4.2.0");
    }

    #[test]
    fn constraint_operators() {
        let cases = [
            ("=1.0", "1.0.0", true),
            ("==1.0", "1.0.1", false),
            ("!=1.0", "1.0.1", true),
            (">1.0", "1.0.0", false),
            (">1.0", "1.0.1", true),
            (">=2.0.0", "2.0.0", true),
            (">=2.0.0", "1.9.9", false),
            ("<2", "1.99.99", true),
            ("<2", "2.0.0", false),
            ("<=2", "2.0.0", true),
            ("1.2.3", "1.2.3", true),
        ];
        for (constraint, version, expected) in cases {
            let c = VersionConstraint::parse(constraint).unwrap();
            assert_eq!(c.matches(&v(version)), expected, "{constraint} vs {version}");
        }
    }

    #[test]
    fn whitespace_between_operator_and_version_is_allowed() {
        let c = VersionConstraint::parse(">= 1.4").unwrap();
        assert_eq!(c.operator, Operator::Ge);
        assert_eq!(c.version, Version::new(1, 4, 0));
        assert_eq!(c.to_string(), ">=1.4.0");
    }

    #[test]
    fn invalid_constraints_are_rejected() {
        for bad in ["", ">=", "~1.0", "=>1.0", ">=1.x"] {
            assert!(VersionConstraint::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn dependency_without_constraint() {
        let (name, constraint) = parse_module_dependency(" python ").unwrap();
        assert_eq!(name, "python");
        assert!(constraint.is_none());
    }

    #[test]
    fn dependency_with_constraint() {
        let (name, constraint) = parse_module_dependency("cuda@>=12.1").unwrap();
        assert_eq!(name, "cuda");
        let constraint = constraint.unwrap();
        assert_eq!(constraint.operator, Operator::Ge);
        assert_eq!(constraint.version, Version::new(12, 1, 0));
    }

    #[test]
    fn dependency_errors() {
        assert!(matches!(
            parse_module_dependency("@1.0"),
            Err(ModuleError::MissingName)
        ));
        assert!(matches!(
            parse_module_dependency("cuda@"),
            Err(ModuleError::InvalidConstraint(_))
        ));
    }
}
