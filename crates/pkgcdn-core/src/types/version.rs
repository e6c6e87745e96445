//! Structured version model used to resolve loose version requests.
//!
//! A [`Version`] is `major[.minor[.patch]][-tag[.iteration]][+meta[.build]]`
//! where every field is optional. Parsed from a full version string it
//! describes one concrete release; parsed from a request such as `2` or
//! `2.3` it acts as a template where unset fields match anything.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version with every component optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    /// First pre-release identifier (`beta` in `1.0.0-beta.2`)
    pub tag: Option<String>,
    /// Remaining pre-release identifiers (`2` in `1.0.0-beta.2`)
    pub iteration: Option<String>,
    /// First build identifier (`sha` in `1.0.0+sha.5114f85`)
    pub meta: Option<String>,
    /// Remaining build identifiers (`5114f85` in `1.0.0+sha.5114f85`)
    pub build: Option<String>,
}

impl Version {
    /// Create a new release version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            patch: Some(patch),
            ..Self::default()
        }
    }

    /// Parse a version or version template.
    ///
    /// A bare integer yields `{major}` only. Text that is not shaped like a
    /// version yields an empty structure, never zeroes.
    pub fn parse(text: &str) -> Self {
        if is_integer(text) {
            return Self {
                major: text.parse().ok(),
                ..Self::default()
            };
        }

        parse_structured(text).unwrap_or_default()
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check whether `candidate` satisfies this version used as a template.
    ///
    /// Fields set here must be equal in `candidate`, unset fields match
    /// anything. The tag is stricter: both sides must agree on whether a tag
    /// is present at all, so a release template never selects a pre-release.
    pub fn matches(&self, candidate: &Version) -> bool {
        fn field<T: PartialEq>(template: &Option<T>, candidate: &Option<T>) -> bool {
            template.is_none() || template == candidate
        }

        field(&self.major, &candidate.major)
            && field(&self.minor, &candidate.minor)
            && field(&self.patch, &candidate.patch)
            && self.tag.is_some() == candidate.tag.is_some()
            && field(&self.tag, &candidate.tag)
            && field(&self.iteration, &candidate.iteration)
            && field(&self.meta, &candidate.meta)
            && field(&self.build, &candidate.build)
    }

    /// Pick the greatest of `candidates` matching the `requested` template.
    ///
    /// Returns `fallback` when nothing matches. Candidates that do not parse
    /// as a version are never picked.
    pub fn max<S: AsRef<str>>(requested: &str, candidates: &[S], fallback: &str) -> String {
        let template = Version::parse(requested);

        candidates
            .iter()
            .map(|candidate| Version::parse(candidate.as_ref()))
            .filter(|candidate| !candidate.is_empty() && template.matches(candidate))
            .max()
            .map(|best| best.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Present numeric parts are compared numerically; an absent part sorts below
/// any present one.
fn cmp_numeric(a: Option<u64>, b: Option<u64>) -> Ordering {
    a.cmp(&b)
}

/// A present label sorts before an absent one (`1.0.0-beta < 1.0.0`), two
/// present labels compare lexicographically.
fn cmp_label(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
        (None, None) => Ordering::Equal,
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_numeric(self.major, other.major)
            .then_with(|| cmp_numeric(self.minor, other.minor))
            .then_with(|| cmp_numeric(self.patch, other.patch))
            .then_with(|| cmp_label(&self.tag, &other.tag))
            .then_with(|| cmp_label(&self.iteration, &other.iteration))
            .then_with(|| cmp_label(&self.meta, &other.meta))
            .then_with(|| cmp_label(&self.build, &other.build))
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Version::parse(s))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        // Separators only go between present parts
        let mut push = |sep: char, value: &str| {
            if !out.is_empty() {
                out.push(sep);
            }
            out.push_str(value);
        };

        if let Some(major) = self.major {
            push('.', &major.to_string());
        }
        if let Some(minor) = self.minor {
            push('.', &minor.to_string());
        }
        if let Some(patch) = self.patch {
            push('.', &patch.to_string());
        }
        if let Some(ref tag) = self.tag {
            push('-', tag);
        }
        if let Some(ref iteration) = self.iteration {
            push('.', iteration);
        }
        if let Some(ref meta) = self.meta {
            push('+', meta);
        }
        if let Some(ref build) = self.build {
            push('.', build);
        }

        f.write_str(&out)
    }
}

fn is_integer(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// `0` or a number without leading zeros
fn is_numeric_identifier(text: &str) -> bool {
    is_integer(text) && (text == "0" || !text.starts_with('0'))
}

fn is_prerelease_identifier(text: &str) -> bool {
    if is_integer(text) {
        return is_numeric_identifier(text);
    }
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn is_build_identifier(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Split `head.rest.of.it` into `(head, Some("rest.of.it"))` after checking
/// every identifier.
fn split_identifiers(text: &str, valid: fn(&str) -> bool) -> Option<(String, Option<String>)> {
    if !text.split('.').all(valid) {
        return None;
    }
    let (head, rest) = match text.split_once('.') {
        Some((head, rest)) => (head, Some(rest.to_string())),
        None => (text, None),
    };
    Some((head.to_string(), rest))
}

fn parse_structured(text: &str) -> Option<Version> {
    let (rest, build_part) = match text.split_once('+') {
        Some((v, b)) => (v, Some(b)),
        None => (text, None),
    };
    // The numeric core never contains '-', so the first one starts the pre-release
    let (core, prerelease_part) = match rest.split_once('-') {
        Some((c, p)) => (c, Some(p)),
        None => (rest, None),
    };

    let numbers: Vec<&str> = core.split('.').collect();
    if numbers.len() > 3 || !numbers.iter().all(|n| is_numeric_identifier(n)) {
        return None;
    }
    let mut numbers = numbers.into_iter().map(|n| n.parse::<u64>().ok());

    let mut version = Version {
        major: Some(numbers.next().flatten()?),
        ..Version::default()
    };
    if let Some(minor) = numbers.next() {
        version.minor = Some(minor?);
    }
    if let Some(patch) = numbers.next() {
        version.patch = Some(patch?);
    }

    if let Some(prerelease) = prerelease_part {
        let (tag, iteration) = split_identifiers(prerelease, is_prerelease_identifier)?;
        version.tag = Some(tag);
        version.iteration = iteration;
    }
    if let Some(build) = build_part {
        let (meta, rest) = split_identifiers(build, is_build_identifier)?;
        version.meta = Some(meta);
        version.build = rest;
    }

    Some(version)
}
