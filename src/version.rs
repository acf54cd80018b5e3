// src/version.rs

//! Package version ordering and constraints
//!
//! Manifest versions are usually semver (`2.29.5`, `0.1.0-13-g98c184d`) but
//! nothing forces that. When either side does not parse, versions are
//! compared segment by segment, numerically where both segments are numbers.

use semver::{Version, VersionReq};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Compare two package version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => compare_segments(a, b),
    }
}

/// Segment-wise ordering for versions like `10.0` or `1.44-rc1`
///
/// A trailing numeric segment makes a version newer (`1.0.1 > 1.0`); a
/// trailing alphabetic one makes it older (`1.0-rc1 < 1.0`).
fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut left = segments(a);
    let mut right = segments(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(x), None) => {
                return if is_numeric(x) { Ordering::Greater } else { Ordering::Less };
            }
            (None, Some(y)) => {
                return if is_numeric(y) { Ordering::Less } else { Ordering::Greater };
            }
            (Some(x), Some(y)) => {
                let ord = compare_segment(x, y);
                if ord.is_ne() {
                    return ord;
                }
            }
        }
    }
}

fn segments(version: &str) -> impl Iterator<Item = &str> {
    version.split(['.', '-', '_', '+']).filter(|s| !s.is_empty())
}

fn is_numeric(segment: &str) -> bool {
    segment.bytes().all(|b| b.is_ascii_digit())
}

fn compare_segment(x: &str, y: &str) -> Ordering {
    match (is_numeric(x), is_numeric(y)) {
        // Digit strings compare by magnitude without parsing, so length is unbounded
        (true, true) => {
            let x = x.trim_start_matches('0');
            let y = y.trim_start_matches('0');
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        }
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.cmp(y),
    }
}

/// Which manifest versions a request accepts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Newest available
    #[default]
    Any,
    /// This exact version string
    Exact(String),
    /// A semver requirement such as `^2.29` or `>=1.44, <2`
    Req(VersionReq),
}

impl VersionConstraint {
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => v == version,
            VersionConstraint::Req(req) => Version::parse(version)
                .map(|v| req.matches(&v))
                .unwrap_or(false),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = String;

    /// A bare version is exact; anything with an operator is a requirement
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }
        let has_operator = s.starts_with(['^', '~', '>', '<', '=']) || s.contains(',');
        if has_operator {
            VersionReq::parse(s)
                .map(VersionConstraint::Req)
                .map_err(|e| format!("Invalid version requirement '{}': {}", s, e))
        } else {
            Ok(VersionConstraint::Exact(s.to_string()))
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => f.write_str("*"),
            VersionConstraint::Exact(v) => f.write_str(v),
            VersionConstraint::Req(req) => write!(f, "{}", req),
        }
    }
}
