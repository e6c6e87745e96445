//! Package coordinates parsing.
//!
//! Coordinates address one file inside one version of one package:
//! `[@scope/]name[@version][/path...]`. Parsing never fails; a malformed
//! string just yields mostly-absent fields, which later fail metadata
//! resolution.

use std::fmt;

/// Parsed package reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCoordinates {
    /// Scope including the leading `@`
    pub scope: Option<String>,
    pub name: String,
    /// `scope/name` for scoped packages, `name` otherwise
    pub fullname: String,
    /// Requested version or dist-tag, absent means "latest"
    pub version: Option<String>,
    /// Requested file, absent means the package entry point
    pub path: Option<String>,
}

impl PackageCoordinates {
    /// Parse a coordinates string such as `@scope/name@1.2.3/dist/x.js`
    pub fn parse(coordinates: &str) -> Self {
        let mut parts = coordinates.split('/').filter(|part| !part.is_empty()).peekable();

        let scoped = parts.peek().map_or(false, |first| first.starts_with('@'));
        let scope = if scoped {
            parts.next().map(str::to_string)
        } else {
            None
        };

        let (name, version) = match parts.next() {
            Some(segment) => match segment.split_once('@') {
                Some((name, version)) => (name.to_string(), non_empty(version)),
                None => (segment.to_string(), None),
            },
            None => (String::new(), None),
        };

        let path = non_empty(&parts.collect::<Vec<_>>().join("/"));

        let fullname = match scope {
            Some(ref scope) => format!("{}/{}", scope, name),
            None => name.clone(),
        };

        Self {
            scope,
            name,
            fullname,
            version,
            path,
        }
    }
}

impl fmt::Display for PackageCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullname)?;
        if let Some(ref version) = self.version {
            write!(f, "@{}", version)?;
        }
        if let Some(ref path) = self.path {
            write!(f, "/{}", path)?;
        }
        Ok(())
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
