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

//! Manifest parsing and validation (spec §4.2, §6).
//!
//! Parsing a manifest from YAML bytes never panics: any malformed input
//! comes back as a [`PromoterError`]. Structural validation (one `src`
//! registry, non-empty names, valid digests/tags) happens on load;
//! cross-manifest validation (§4.2 "Cross-manifest validation") happens
//! once a whole batch has been loaded, since it needs to see every
//! manifest at once.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entity::{Digest, ImageName, RegistryName, Tag};
use crate::error::PromoterError;

/// The YAML shape of one registry entry in a manifest file (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRegistry {
    pub name: String,
    #[serde(rename = "service-account", default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub src: bool,
}

/// The YAML shape of one image entry in a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawImage {
    pub name: String,
    pub dmap: BTreeMap<String, Vec<String>>,
    /// Optional destination-name substitution (spec §9 open question:
    /// rename is a straight destination-name substitution at
    /// edge-generation time).
    #[serde(default)]
    pub rename: Option<String>,
}

/// The YAML shape of a whole manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawManifest {
    pub registries: Vec<RawRegistry>,
    #[serde(default)]
    pub images: Vec<RawImage>,
}

/// A registry entry within a validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRegistry {
    pub name: RegistryName,
    pub service_account: Option<String>,
    pub is_src: bool,
}

/// An image entry within a validated manifest: name plus digest -> tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestImage {
    pub name: ImageName,
    pub dmap: BTreeMap<Digest, Vec<Tag>>,
    pub rename: Option<ImageName>,
}

/// A fully validated manifest, with its source registry denormalized
/// (spec §3 "A denormalized 'source registry' pointer is computed at load
/// time").
#[derive(Debug, Clone)]
pub struct Manifest {
    pub registries: Vec<ManifestRegistry>,
    pub images: Vec<ManifestImage>,
    src_index: usize,
}

impl Manifest {
    pub fn source_registry(&self) -> &ManifestRegistry {
        &self.registries[self.src_index]
    }

    pub fn destination_registries(&self) -> impl Iterator<Item = &ManifestRegistry> {
        self.registries
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.src_index)
            .map(|(_, r)| r)
    }

    /// Parse and structurally validate one manifest from YAML bytes.
    pub fn from_yaml(bytes: &[u8]) -> Result<Manifest, PromoterError> {
        let raw: RawManifest = serde_yml::from_slice(bytes)?;
        Manifest::from_raw(raw)
    }

    fn from_raw(raw: RawManifest) -> Result<Manifest, PromoterError> {
        if raw.registries.is_empty() {
            return Err(PromoterError::InvalidManifest(
                "manifest must declare at least one registry".into(),
            ));
        }

        let mut registries = Vec::with_capacity(raw.registries.len());
        let mut src_index = None;
        for (i, r) in raw.registries.into_iter().enumerate() {
            if r.name.is_empty() {
                return Err(PromoterError::InvalidManifest(
                    "registry name must not be empty".into(),
                ));
            }
            if r.src {
                if src_index.is_some() {
                    return Err(PromoterError::InvalidManifest(
                        "manifest declares more than one src=true registry".into(),
                    ));
                }
                src_index = Some(i);
            }
            registries.push(ManifestRegistry {
                name: RegistryName::new(r.name)?,
                service_account: r.service_account,
                is_src: r.src,
            });
        }
        let src_index = src_index.ok_or_else(|| {
            PromoterError::InvalidManifest("manifest must declare exactly one src=true registry".into())
        })?;

        let mut images = Vec::with_capacity(raw.images.len());
        for img in raw.images {
            if img.name.is_empty() {
                return Err(PromoterError::InvalidManifest(
                    "image name must not be empty".into(),
                ));
            }
            if img.dmap.is_empty() {
                return Err(PromoterError::InvalidManifest(format!(
                    "image '{}' has an empty dmap",
                    img.name
                )));
            }
            let mut dmap = BTreeMap::new();
            for (digest_str, tag_strs) in img.dmap {
                let digest = Digest::parse(digest_str)?;
                let mut tags = Vec::with_capacity(tag_strs.len());
                for t in tag_strs {
                    tags.push(Tag::parse(t)?);
                }
                dmap.insert(digest, tags);
            }
            let rename = img.rename.map(ImageName::new).transpose()?;
            images.push(ManifestImage {
                name: ImageName::new(img.name)?,
                dmap,
                rename,
            });
        }

        Ok(Manifest {
            registries,
            images,
            src_index,
        })
    }
}

/// Validate invariants that only make sense across an entire batch of
/// manifests loaded together in one run (spec §3 invariant 2, §4.2
/// "Cross-manifest validation").
pub fn validate_batch(manifests: &[Manifest]) -> Result<(), PromoterError> {
    let mut seen_src: HashMap<&str, usize> = HashMap::new();
    for (i, m) in manifests.iter().enumerate() {
        let src_name = m.source_registry().name.as_str();
        if let Some(prev) = seen_src.insert(src_name, i) {
            return Err(PromoterError::InvalidManifest(format!(
                "source registry '{}' is declared by both manifest #{} and manifest #{}",
                src_name, prev, i
            )));
        }
    }

    let mut seen_renames: HashSet<(&str, &str)> = HashSet::new();
    for m in manifests {
        for img in &m.images {
            if let Some(rename) = &img.rename {
                let key = (img.name.as_str(), rename.as_str());
                if !seen_renames.insert(key) {
                    return Err(PromoterError::InvalidManifest(format!(
                        "rename path '{}' -> '{}' is declared by more than one manifest",
                        img.name, rename
                    )));
                }
            }
        }
    }

    // Destination (registry, image, tag) collisions across manifests with
    // differing digests (re-checked again after edges are built, per
    // spec §4.2).
    let mut dest_digests: HashMap<(String, String, String), &Digest> = HashMap::new();
    for m in manifests {
        for dst in m.destination_registries() {
            for img in &m.images {
                let dst_image = img.rename.as_ref().unwrap_or(&img.name);
                for (digest, tags) in &img.dmap {
                    for tag in tags {
                        let key = (dst.name.as_str().to_string(), dst_image.as_str().to_string(), tag.as_str().to_string());
                        if let Some(existing) = dest_digests.get(&key) {
                            if *existing != digest {
                                return Err(PromoterError::InvalidManifest(format!(
                                    "destination {}/{}:{} is claimed by both digest {} and digest {}",
                                    key.0, key.1, key.2, existing, digest
                                )));
                            }
                        } else {
                            dest_digests.insert(key, digest);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// An opaque loader of manifest batches, supplied by the caller (spec §1:
/// "manifest file discovery on disk ... treated as an opaque
/// `ManifestLoader`"). The concrete filesystem/thin-manifest-directory
/// implementation lives in the CLI crate.
pub trait ManifestLoader {
    fn load(&self) -> Result<Vec<Manifest>, PromoterError>;
}
