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

//! Deterministic textual rendering of inventories (spec §4.1, §6).

use crate::entity::{Digest, ImageName};
use crate::inventory::{DigestMediaType, ParentDigest, RegInvFlat, RegInvImage};

#[derive(Debug, Clone, serde::Serialize)]
struct YamlImage {
    name: String,
    dmap: std::collections::BTreeMap<String, Vec<String>>,
}

/// Render a `RegInvImage` as stable YAML: images sorted by name, digests
/// sorted lexicographically, tags sorted lexicographically, empty tag
/// slices rendered as `[]` (spec §4.1).
pub fn to_yaml(inv: &RegInvImage) -> Result<String, serde_yml::Error> {
    let mut images = Vec::new();
    for name in inv.images() {
        let digests = inv.digests_for(name).expect("image present in its own keyset");
        let mut dmap = std::collections::BTreeMap::new();
        for (digest, tags) in digests {
            let sorted: Vec<String> = tags.sorted().iter().map(|t| t.as_str().to_string()).collect();
            dmap.insert(digest.as_str().to_string(), sorted);
        }
        images.push(YamlImage {
            name: name.as_str().to_string(),
            dmap,
        });
    }
    serde_yml::to_string(&images)
}

/// Render a `RegInvImage` as `image,digest,tag` CSV, sorted the same way
/// as [`to_yaml`]. A tagless digest is rendered with an empty tag field.
pub fn to_csv(inv: &RegInvImage) -> String {
    let flat: RegInvFlat = inv.into();
    let mut out = String::from("image,digest,tag\n");
    for (image, digest, tag) in flat.iter() {
        out.push_str(image.as_str());
        out.push(',');
        out.push_str(digest.as_str());
        out.push(',');
        if let Some(tag) = tag {
            out.push_str(tag.as_str());
        }
        out.push('\n');
    }
    out
}

/// Elide children already referenced by a promoted parent manifest-list
/// digest from a minimal snapshot (spec §4.4 "This later enables
/// `RemoveChildDigestEntries`").
pub fn remove_child_digest_entries(
    inv: &RegInvImage,
    media_types: &DigestMediaType,
    parents: &ParentDigest,
) -> RegInvImage {
    let _ = media_types; // classification already folded into `parents`
    let mut out = RegInvImage::new();
    for image in inv.images() {
        for (digest, tags) in inv.digests_for(image).unwrap() {
            if parents.parent_of(digest).is_some() {
                continue;
            }
            out.insert(image.clone(), digest.clone(), tags.clone());
        }
    }
    out
}

/// Helper used by callers reporting which images/digests were elided by
/// [`remove_child_digest_entries`] (diagnostic only).
pub fn elided_children<'a>(
    inv: &'a RegInvImage,
    parents: &'a ParentDigest,
) -> Vec<(&'a ImageName, &'a Digest)> {
    let mut out = Vec::new();
    for image in inv.images() {
        for digest in inv.digests_for(image).unwrap().keys() {
            if parents.parent_of(digest).is_some() {
                out.push((image, digest));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ImageName, Tag};
    use crate::inventory::TagSlice;

    fn img(s: &str) -> ImageName {
        ImageName::new(s).unwrap()
    }
    fn dig(c: char) -> Digest {
        Digest::parse(format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }
    fn tag(s: &str) -> Tag {
        Tag::parse(s).unwrap()
    }

    #[test]
    fn yaml_rendering_is_deterministic_across_calls() {
        let mut inv = RegInvImage::new();
        inv.insert(img("b"), dig('1'), TagSlice::new(vec![tag("z"), tag("a")]));
        inv.insert(img("a"), dig('0'), TagSlice::new(vec![]));

        let first = to_yaml(&inv).unwrap();
        let second = to_yaml(&inv).unwrap();
        assert_eq!(first, second);
        // "a" sorts before "b"; tags within b's digest sort "a" before "z".
        assert!(first.find("name: a").unwrap() < first.find("name: b").unwrap());
    }

    #[test]
    fn empty_tag_slice_renders_as_empty_list() {
        let mut inv = RegInvImage::new();
        inv.insert(img("a"), dig('0'), TagSlice::new(vec![]));
        let yaml = to_yaml(&inv).unwrap();
        assert!(yaml.contains("[]"));
    }

    #[test]
    fn csv_rendering_sorts_rows() {
        let mut inv = RegInvImage::new();
        inv.insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));
        let csv = to_csv(&inv);
        assert!(csv.starts_with("image,digest,tag\n"));
        assert!(csv.contains("a,"));
    }

    #[test]
    fn minimal_snapshot_elides_promoted_children() {
        let mut inv = RegInvImage::new();
        inv.insert(img("a"), dig('0'), TagSlice::new(vec![tag("latest")]));
        inv.insert(img("a"), dig('1'), TagSlice::new(vec![]));

        let mut parents = ParentDigest::new();
        parents.insert(dig('1'), dig('0'));

        let media_types = DigestMediaType::new();
        let minimal = remove_child_digest_entries(&inv, &media_types, &parents);
        assert!(minimal.contains_digest(&img("a"), &dig('0')));
        assert!(!minimal.contains_digest(&img("a"), &dig('1')));
    }
}
