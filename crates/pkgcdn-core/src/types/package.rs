//! Package metadata types.
//!
//! The registry metadata document (`GET {registry}/{fullname}`). Only the
//! fields the proxy reads are typed; everything else is carried through in
//! `extra` so the on-disk snapshot stays a faithful copy of upstream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::Version;

/// Registry metadata for one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub name: String,
    /// Named pointers such as `latest` or `beta`
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    /// Manifest of every published version
    #[serde(default)]
    pub versions: HashMap<String, VersionManifest>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Manifest of one published version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub version: String,
    /// Entry point served when no path is requested
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub main: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `main` is occasionally published as something other than a string
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

impl PackageMetadata {
    /// Create empty metadata for a package
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dist_tags: HashMap::new(),
            versions: HashMap::new(),
            extra: Map::new(),
        }
    }

    /// Version a dist-tag points at
    pub fn dist_tag(&self, tag: &str) -> Option<&str> {
        self.dist_tags.get(tag).map(String::as_str)
    }

    /// Version the `latest` dist-tag points at
    pub fn latest(&self) -> Option<&str> {
        self.dist_tag("latest")
    }

    /// Every published version string
    pub fn version_names(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }

    /// Resolve a requested version (dist-tag, exact version or template) to a
    /// concrete version string.
    ///
    /// Dist-tags win; otherwise the greatest published version matching the
    /// template is picked, falling back to `latest`. An absent request goes
    /// straight to `latest`.
    pub fn resolve_version(&self, requested: Option<&str>) -> Option<String> {
        let requested = match requested {
            Some(requested) => requested,
            None => {
                return self
                    .latest()
                    .map(str::to_string)
                    .or_else(|| self.resolve_version(Some("")))
            }
        };

        if let Some(tagged) = self.dist_tag(requested) {
            return Some(tagged.to_string());
        }

        let candidates = self.version_names();
        match self.latest() {
            Some(latest) => Some(Version::max(requested, &candidates, latest)),
            None => {
                let best = Version::max(requested, &candidates, "");
                if best.is_empty() {
                    None
                } else {
                    Some(best)
                }
            }
        }
    }

    /// Declared entry point of a version, without a leading `./`
    pub fn main_entry(&self, version: &str) -> Option<String> {
        let main = self.versions.get(version)?.main.as_deref()?;
        let normalized = main
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect::<Vec<_>>()
            .join("/");
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}
