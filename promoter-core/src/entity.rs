// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Primitive value types of the promotion engine (spec §3).
//!
//! `Digest` and `Tag` validate their grammar on construction; a value of
//! either type is always well-formed from then on. `RegistryName` has no
//! grammar of its own beyond non-emptiness — matching a concrete registry
//! against a name is the job of the longest-prefix match in
//! [`RegistryName::owns`].

use std::fmt;

use regexes::digest_regex;
use regexes::tag_regex;

use crate::error::PromoterError;

mod regexes {
    //! Lazily-compiled validation regexes, shared across every
    //! `Digest`/`Tag` constructed in a process.
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn digest_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("static digest regex"))
    }

    pub fn tag_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static tag regex")
        })
    }
}

/// A canonical registry name: a host plus zero or more leading path
/// segments, e.g. `gcr.io` or `gcr.io/foo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct RegistryName(String);

impl RegistryName {
    pub fn new(name: impl Into<String>) -> Result<Self, PromoterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PromoterError::InvalidManifest(
                "registry name must not be empty".into(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Longest-prefix match: does `self` own `full_path` (e.g. does
    /// `gcr.io/foo` own `gcr.io/foo/addon-resizer`)?
    pub fn owns(&self, full_path: &str) -> bool {
        full_path == self.0.as_str()
            || full_path
                .strip_prefix(self.0.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

impl fmt::Display for RegistryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image name: a repository path under a registry, e.g.
/// `addon-resizer` or `pause/childLevel1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ImageName(String);

impl ImageName {
    pub fn new(name: impl Into<String>) -> Result<Self, PromoterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PromoterError::InvalidManifest(
                "image name must not be empty".into(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content digest, `sha256:<64 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PromoterError> {
        let raw = raw.into();
        if !digest_regex().is_match(&raw) {
            return Err(PromoterError::InvalidManifest(format!(
                "'{}' is not a valid digest (expected sha256:<64 hex chars>)",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag. The empty tag is legal on an edge (tagless promotion) but never
/// legal as a standalone `Tag` value coming out of manifest parsing — the
/// empty case is represented as `Option<Tag>` at the edge layer instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Tag(String);

impl Tag {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PromoterError> {
        let raw = raw.into();
        if !tag_regex().is_match(&raw) {
            return Err(PromoterError::InvalidManifest(format!(
                "'{}' is not a valid tag",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_regex_accepts_valid() {
        let d = "sha256:".to_string() + &"a".repeat(64);
        assert!(Digest::parse(d).is_ok());
    }

    #[test]
    fn digest_regex_rejects_short_hex() {
        let d = "sha256:".to_string() + &"a".repeat(63);
        assert!(Digest::parse(d).is_err());
    }

    #[test]
    fn digest_regex_rejects_uppercase_hex() {
        let d = "sha256:".to_string() + &"A".repeat(64);
        assert!(Digest::parse(d).is_err());
    }

    #[test]
    fn tag_regex_accepts_typical_tags() {
        for t in ["latest", "v1.2.3", "0.9", "a_b-c.d"] {
            assert!(Tag::parse(t).is_ok(), "expected {} to be valid", t);
        }
    }

    #[test]
    fn tag_regex_rejects_leading_dot() {
        assert!(Tag::parse(".foo").is_err());
    }

    #[test]
    fn tag_regex_rejects_over_128_chars() {
        let t = "a".repeat(129);
        assert!(Tag::parse(t).is_err());
    }

    #[test]
    fn registry_owns_longest_prefix() {
        let r = RegistryName::new("gcr.io/foo").unwrap();
        assert!(r.owns("gcr.io/foo/addon-resizer"));
        assert!(r.owns("gcr.io/foo"));
        assert!(!r.owns("gcr.io/foobar"));
        assert!(!r.owns("gcr.io/bar"));
    }
}
