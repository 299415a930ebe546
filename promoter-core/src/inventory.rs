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

//! Observed registry state and the set algebra over it (spec §3, §4.1).
//!
//! [`RegInvImage`] is the canonical view (`image -> digest -> tags`); the
//! other views are pure conversions over it. `Union`/`Minus`/`Intersection`
//! are defined on `RegInvImage`, `RegInvImageTag` and `TagSlice` and always
//! return a new value — nothing here mutates its operands.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{Digest, ImageName, RegistryName, Tag};

/// An ordered sequence of tags, as delivered by a registry for one digest.
/// Equality and set operations treat it as a set; iteration order is
/// preserved for display/serialization of a single inventory entry.
#[derive(Debug, Clone, Default)]
pub struct TagSlice(Vec<Tag>);

impl PartialEq for TagSlice {
    fn eq(&self, other: &Self) -> bool {
        self.as_set() == other.as_set()
    }
}

impl Eq for TagSlice {}

impl std::hash::Hash for TagSlice {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for tag in self.sorted() {
            tag.hash(state);
        }
    }
}

impl TagSlice {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    pub fn as_slice(&self) -> &[Tag] {
        &self.0
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_set(&self) -> BTreeSet<&Tag> {
        self.0.iter().collect()
    }

    pub fn union(&self, other: &TagSlice) -> TagSlice {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for t in self.0.iter().chain(other.0.iter()) {
            if seen.insert(t.clone()) {
                out.push(t.clone());
            }
        }
        TagSlice(out)
    }

    pub fn minus(&self, other: &TagSlice) -> TagSlice {
        let other_set = other.as_set();
        TagSlice(
            self.0
                .iter()
                .filter(|t| !other_set.contains(t))
                .cloned()
                .collect(),
        )
    }

    pub fn intersection(&self, other: &TagSlice) -> TagSlice {
        let other_set = other.as_set();
        TagSlice(
            self.0
                .iter()
                .filter(|t| other_set.contains(t))
                .cloned()
                .collect(),
        )
    }

    /// A stable, sorted copy for deterministic rendering (spec §4.1).
    pub fn sorted(&self) -> Vec<Tag> {
        let mut v = self.0.clone();
        v.sort();
        v
    }
}

/// The canonical observed-inventory view: `image -> digest -> tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegInvImage(BTreeMap<ImageName, BTreeMap<Digest, TagSlice>>);

impl RegInvImage {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, image: ImageName, digest: Digest, tags: TagSlice) {
        self.0.entry(image).or_default().insert(digest, tags);
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageName> {
        self.0.keys()
    }

    pub fn digests_for(&self, image: &ImageName) -> Option<&BTreeMap<Digest, TagSlice>> {
        self.0.get(image)
    }

    pub fn tags_for(&self, image: &ImageName, digest: &Digest) -> Option<&TagSlice> {
        self.0.get(image).and_then(|d| d.get(digest))
    }

    pub fn contains_digest(&self, image: &ImageName, digest: &Digest) -> bool {
        self.digests_for(image)
            .map(|d| d.contains_key(digest))
            .unwrap_or(false)
    }

    /// The digest (if any) currently holding `tag` for `image`.
    pub fn digest_for_tag(&self, image: &ImageName, tag: &Tag) -> Option<&Digest> {
        self.0.get(image).and_then(|digests| {
            digests
                .iter()
                .find(|(_, tags)| tags.contains(tag))
                .map(|(d, _)| d)
        })
    }

    pub fn union(&self, other: &RegInvImage) -> RegInvImage {
        let mut out = self.clone();
        for (image, digests) in &other.0 {
            for (digest, tags) in digests {
                let entry = out
                    .0
                    .entry(image.clone())
                    .or_default()
                    .entry(digest.clone())
                    .or_insert_with(TagSlice::default);
                *entry = entry.union(tags);
            }
        }
        out
    }

    pub fn minus(&self, other: &RegInvImage) -> RegInvImage {
        let mut out = RegInvImage::new();
        for (image, digests) in &self.0 {
            for (digest, tags) in digests {
                match other.digests_for(image).and_then(|d| d.get(digest)) {
                    Some(other_tags) => {
                        let remaining = tags.minus(other_tags);
                        if !remaining.is_empty() {
                            out.insert(image.clone(), digest.clone(), remaining);
                        }
                    }
                    None => out.insert(image.clone(), digest.clone(), tags.clone()),
                }
            }
        }
        out
    }

    pub fn intersection(&self, other: &RegInvImage) -> RegInvImage {
        let mut out = RegInvImage::new();
        for (image, digests) in &self.0 {
            if let Some(other_digests) = other.digests_for(image) {
                for (digest, tags) in digests {
                    if let Some(other_tags) = other_digests.get(digest) {
                        let common = tags.intersection(other_tags);
                        if !common.is_empty() {
                            out.insert(image.clone(), digest.clone(), common);
                        }
                    }
                }
            }
        }
        out
    }
}

/// `(name, digest) -> tags`.
#[derive(Debug, Clone, Default)]
pub struct RegInvImageDigest(BTreeMap<(ImageName, Digest), TagSlice>);

impl From<&RegInvImage> for RegInvImageDigest {
    fn from(src: &RegInvImage) -> Self {
        let mut out = BTreeMap::new();
        for (image, digests) in &src.0 {
            for (digest, tags) in digests {
                out.insert((image.clone(), digest.clone()), tags.clone());
            }
        }
        RegInvImageDigest(out)
    }
}

impl RegInvImageDigest {
    pub fn get(&self, image: &ImageName, digest: &Digest) -> Option<&TagSlice> {
        self.0.get(&(image.clone(), digest.clone()))
    }
}

/// `(name, tag) -> digest`. Constructing this view from a `RegInvImage`
/// where two digests share a tag for the same image keeps the
/// lexicographically-first digest — that situation should never arise from
/// a real registry read, since a tag can only point at one digest, but the
/// type itself doesn't forbid building one by hand with a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegInvImageTag(BTreeMap<(ImageName, Tag), Digest>);

impl From<&RegInvImage> for RegInvImageTag {
    fn from(src: &RegInvImage) -> Self {
        let mut out = BTreeMap::new();
        for (image, digests) in &src.0 {
            for (digest, tags) in digests {
                for tag in tags.as_slice() {
                    out.entry((image.clone(), tag.clone()))
                        .or_insert_with(|| digest.clone());
                }
            }
        }
        RegInvImageTag(out)
    }
}

impl RegInvImageTag {
    pub fn get(&self, image: &ImageName, tag: &Tag) -> Option<&Digest> {
        self.0.get(&(image.clone(), tag.clone()))
    }

    pub fn union(&self, other: &RegInvImageTag) -> RegInvImageTag {
        let mut out = self.0.clone();
        for (k, v) in &other.0 {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        RegInvImageTag(out)
    }

    pub fn minus(&self, other: &RegInvImageTag) -> RegInvImageTag {
        RegInvImageTag(
            self.0
                .iter()
                .filter(|(k, _)| !other.0.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn intersection(&self, other: &RegInvImageTag) -> RegInvImageTag {
        RegInvImageTag(
            self.0
                .iter()
                .filter(|(k, v)| other.0.get(*k) == Some(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// `(name, digest, tag) -> ()`, the flattened view used for CSV rendering.
#[derive(Debug, Clone, Default)]
pub struct RegInvFlat(BTreeSet<(ImageName, Digest, Option<Tag>)>);

impl From<&RegInvImage> for RegInvFlat {
    fn from(src: &RegInvImage) -> Self {
        let mut out = BTreeSet::new();
        for (image, digests) in &src.0 {
            for (digest, tags) in digests {
                if tags.is_empty() {
                    out.insert((image.clone(), digest.clone(), None));
                } else {
                    for tag in tags.as_slice() {
                        out.insert((image.clone(), digest.clone(), Some(tag.clone())));
                    }
                }
            }
        }
        RegInvFlat(out)
    }
}

impl RegInvFlat {
    pub fn iter(&self) -> impl Iterator<Item = &(ImageName, Digest, Option<Tag>)> {
        self.0.iter()
    }
}

/// `registry -> inventory`, as populated by the registry reader (§4.4).
#[derive(Debug, Clone, Default)]
pub struct MasterInventory(BTreeMap<RegistryName, RegInvImage>);

impl MasterInventory {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn registry(&self, name: &RegistryName) -> Option<&RegInvImage> {
        self.0.get(name)
    }

    pub fn entry(&mut self, name: RegistryName) -> &mut RegInvImage {
        self.0.entry(name).or_default()
    }

    pub fn registries(&self) -> impl Iterator<Item = &RegistryName> {
        self.0.keys()
    }
}

/// Classified media type for a digest, populated during the read phase
/// (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    ManifestList,
    ManifestV2Schema1,
    ManifestV2Schema1Signed,
    ManifestV2Schema2,
}

/// `digest -> media type`.
#[derive(Debug, Clone, Default)]
pub struct DigestMediaType(BTreeMap<Digest, MediaType>);

impl DigestMediaType {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, digest: Digest, media_type: MediaType) {
        self.0.insert(digest, media_type);
    }

    pub fn get(&self, digest: &Digest) -> Option<MediaType> {
        self.0.get(digest).copied()
    }

    pub fn manifest_lists(&self) -> impl Iterator<Item = &Digest> {
        self.0
            .iter()
            .filter(|(_, mt)| **mt == MediaType::ManifestList)
            .map(|(d, _)| d)
    }
}

/// `child digest -> parent manifest-list digest`, populated by the
/// second reader pass over manifest lists (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct ParentDigest(BTreeMap<Digest, Digest>);

impl ParentDigest {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, child: Digest, parent: Digest) {
        self.0.insert(child, parent);
    }

    pub fn parent_of(&self, child: &Digest) -> Option<&Digest> {
        self.0.get(child)
    }

    pub fn children(&self) -> impl Iterator<Item = &Digest> {
        self.0.keys()
    }
}

/// Image names excluded from promotion after a read failure (spec §4.4,
/// §7 `RegistryReadFailed`).
#[derive(Debug, Clone, Default)]
pub struct InvIgnore(BTreeSet<ImageName>);

impl InvIgnore {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn mark(&mut self, image: ImageName) {
        self.0.insert(image);
    }

    pub fn contains(&self, image: &ImageName) -> bool {
        self.0.contains(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(s: &str) -> ImageName {
        ImageName::new(s).unwrap()
    }

    fn dig(n: u8) -> Digest {
        Digest::parse(format!("sha256:{}", hex::encode_fake(n))).unwrap()
    }

    // Minimal fake hex encoder so tests don't need a hex crate dependency
    // just to build 64-char digests.
    mod hex {
        pub fn encode_fake(n: u8) -> String {
            format!("{:02x}", n).repeat(32)
        }
    }

    fn tags(v: &[&str]) -> TagSlice {
        TagSlice::new(v.iter().map(|t| Tag::parse(*t).unwrap()).collect())
    }

    #[test]
    fn union_is_idempotent() {
        let mut a = RegInvImage::new();
        a.insert(img("a"), dig(0), tags(&["0.9"]));
        assert_eq!(a.union(&a), a);
    }

    #[test]
    fn minus_self_is_empty() {
        let mut a = RegInvImage::new();
        a.insert(img("a"), dig(0), tags(&["0.9"]));
        let diff = a.minus(&a);
        assert_eq!(diff, RegInvImage::new());
    }

    #[test]
    fn intersection_is_idempotent() {
        let mut a = RegInvImage::new();
        a.insert(img("a"), dig(0), tags(&["0.9", "latest"]));
        assert_eq!(a.intersection(&a), a);
    }

    #[test]
    fn union_commutative() {
        let mut a = RegInvImage::new();
        a.insert(img("a"), dig(0), tags(&["0.9"]));
        let mut b = RegInvImage::new();
        b.insert(img("a"), dig(0), tags(&["latest"]));
        assert_eq!(a.union(&b), b.union(&a));
    }

    #[test]
    fn tag_slice_equality_ignores_order() {
        let t1 = tags(&["a", "b"]);
        let t2 = TagSlice::new(vec![Tag::parse("b").unwrap(), Tag::parse("a").unwrap()]);
        assert_eq!(t1, t2);
        assert_eq!(t1.sorted(), t2.sorted());
    }

    #[test]
    fn reg_inv_image_tag_view_maps_each_tag() {
        let mut a = RegInvImage::new();
        a.insert(img("a"), dig(0), tags(&["0.9"]));
        let view: RegInvImageTag = (&a).into();
        assert_eq!(
            view.get(&img("a"), &Tag::parse("0.9").unwrap()),
            Some(&dig(0))
        );
    }
}
