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

//! The edge builder: manifests + observed inventory -> a minimal,
//! validated set of promotion actions (spec §4.3).

use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;

use crate::entity::{Digest, ImageName, RegistryName, Tag};
use crate::error::PromoterError;
use crate::inventory::{InvIgnore, MasterInventory, RegInvImage};
use crate::manifest::Manifest;

/// A partially- or loosely-qualified image name at one end of an edge:
/// `(name, tag)`, where `tag = None` represents a tagless promotion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageTag {
    pub name: ImageName,
    pub tag: Option<Tag>,
}

/// The atomic unit of desired state (spec §3): a specific digest bound
/// from a source `(registry, image, tag)` to a destination one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromotionEdge {
    pub src_registry: RegistryName,
    pub src: ImageTag,
    pub digest: Digest,
    pub dst_registry: RegistryName,
    pub dst: ImageTag,
}

/// The action required to realize one edge (spec §4.3, §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add,
    Move { old_digest: Digest },
    /// Emitted only by the separate garbage-collector path (spec §4.5),
    /// never by `filter_promotion_edges`.
    Delete,
}

/// The evaluation of one vertex (a `(registry, image)` pair, under a
/// specific tag and candidate digest) against the observed inventory
/// (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexProperty {
    pub digest_exists: bool,
    pub pqin_exists: bool,
    pub pqin_digest_match: bool,
    pub bad_digest: Option<Digest>,
    pub other_tags: Vec<Tag>,
}

pub fn eval_vertex(
    inv: Option<&RegInvImage>,
    image: &ImageName,
    tag: Option<&Tag>,
    digest: &Digest,
) -> VertexProperty {
    let Some(inv) = inv else {
        return VertexProperty::default();
    };

    let digest_exists = inv.contains_digest(image, digest);
    let other_tags = inv
        .tags_for(image, digest)
        .map(|t| t.as_slice().to_vec())
        .unwrap_or_default();

    let (pqin_exists, pqin_digest_match, bad_digest) = match tag {
        Some(tag) => match inv.digest_for_tag(image, tag) {
            Some(holder) => {
                let matches = holder == digest;
                (true, matches, if matches { None } else { Some(holder.clone()) })
            }
            None => (false, false, None),
        },
        None => (false, false, None),
    };

    VertexProperty {
        digest_exists,
        pqin_exists,
        pqin_digest_match,
        bad_digest,
        other_tags,
    }
}

/// Convert a batch of validated manifests into a deduplicated edge set
/// (spec §4.3 "Edge generation").
pub fn to_promotion_edges(manifests: &[Manifest]) -> HashSet<PromotionEdge> {
    let mut edges = HashSet::new();
    for manifest in manifests {
        let src = manifest.source_registry();
        for dst in manifest.destination_registries() {
            for image in &manifest.images {
                let dst_name = image.rename.clone().unwrap_or_else(|| image.name.clone());
                for (digest, tags) in &image.dmap {
                    if tags.is_empty() {
                        edges.insert(PromotionEdge {
                            src_registry: src.name.clone(),
                            src: ImageTag {
                                name: image.name.clone(),
                                tag: None,
                            },
                            digest: digest.clone(),
                            dst_registry: dst.name.clone(),
                            dst: ImageTag {
                                name: dst_name.clone(),
                                tag: None,
                            },
                        });
                    } else {
                        for tag in tags {
                            edges.insert(PromotionEdge {
                                src_registry: src.name.clone(),
                                src: ImageTag {
                                    name: image.name.clone(),
                                    tag: Some(tag.clone()),
                                },
                                digest: digest.clone(),
                                dst_registry: dst.name.clone(),
                                dst: ImageTag {
                                    name: dst_name.clone(),
                                    tag: Some(tag.clone()),
                                },
                            });
                        }
                    }
                }
            }
        }
    }
    edges
}

/// Check that no two distinct edges share a destination `(registry,
/// image, tag)` triple with differing digests (spec §3 invariant 3,
/// §4.3 "Overlap check"). Tagless edges are excluded, since many tagless
/// edges may legally share a triple. Returns the input unchanged when
/// there is no overlap.
pub fn check_overlapping_edges(
    edges: HashSet<PromotionEdge>,
) -> Result<HashSet<PromotionEdge>, PromoterError> {
    let mut seen: HashMap<(RegistryName, ImageName, Tag), &Digest> = HashMap::new();
    for edge in &edges {
        let Some(tag) = &edge.dst.tag else {
            continue;
        };
        let key = (edge.dst_registry.clone(), edge.dst.name.clone(), tag.clone());
        match seen.get(&key) {
            Some(existing) if *existing != &edge.digest => {
                return Err(PromoterError::OverlappingEdges {
                    registry: key.0.to_string(),
                    image: key.1.to_string(),
                    tag: key.2.to_string(),
                    first: existing.to_string(),
                    second: edge.digest.to_string(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(key, &edge.digest);
            }
        }
    }
    Ok(edges)
}

/// Filter a candidate edge set against the observed inventory, assigning
/// each surviving edge an [`Action`] (spec §4.3 "Filtering and action
/// selection"). Returns `(candidates, clean)`: `clean` is false whenever
/// any edge required a tag move.
pub fn filter_promotion_edges(
    edges: &HashSet<PromotionEdge>,
    inventory: &MasterInventory,
    ignore: &InvIgnore,
) -> (Vec<(PromotionEdge, Action)>, bool) {
    let mut candidates = Vec::new();
    let mut clean = true;

    // Stable iteration order makes output (and therefore `clean`)
    // deterministic across runs for a fixed input.
    let mut sorted: Vec<&PromotionEdge> = edges.iter().collect();
    sorted.sort();

    for edge in sorted {
        if ignore.contains(&edge.src.name) {
            warn!(
                "dropping edge for '{}': image is on the ignore list after a failed read",
                edge.src.name
            );
            continue;
        }

        let src_inv = inventory.registry(&edge.src_registry);
        let src_vertex = eval_vertex(src_inv, &edge.src.name, edge.src.tag.as_ref(), &edge.digest);
        if !src_vertex.digest_exists {
            warn!(
                "lost image: digest {} for '{}' not found in source registry {}",
                edge.digest, edge.src.name, edge.src_registry
            );
            continue;
        }

        let dst_inv = inventory.registry(&edge.dst_registry);
        let dst_vertex = eval_vertex(dst_inv, &edge.dst.name, edge.dst.tag.as_ref(), &edge.digest);

        if edge.dst.tag.is_some() {
            if dst_vertex.pqin_digest_match {
                continue;
            }
            if let Some(bad) = &dst_vertex.bad_digest {
                clean = false;
                candidates.push((edge.clone(), Action::Move { old_digest: bad.clone() }));
                continue;
            }
        } else if dst_vertex.digest_exists {
            // Tagless digest already present at the destination.
            continue;
        }

        candidates.push((edge.clone(), Action::Add));
    }

    (candidates, clean)
}

/// Enumerate destination digests whose tag list is empty in the manifest
/// and emit a `DELETE` action for each (spec §4.5 "Garbage collection").
/// The source registry is skipped.
pub fn garbage_collect_candidates(manifest: &Manifest) -> Vec<PromotionEdge> {
    let mut out = Vec::new();
    let src = manifest.source_registry();
    for dst in manifest.destination_registries() {
        for image in &manifest.images {
            let dst_name = image.rename.clone().unwrap_or_else(|| image.name.clone());
            for (digest, tags) in &image.dmap {
                if tags.is_empty() {
                    out.push(PromotionEdge {
                        src_registry: src.name.clone(),
                        src: ImageTag {
                            name: image.name.clone(),
                            tag: None,
                        },
                        digest: digest.clone(),
                        dst_registry: dst.name.clone(),
                        dst: ImageTag {
                            name: dst_name.clone(),
                            tag: None,
                        },
                    });
                }
            }
        }
    }
    out
}

/// Sorted destination triples appearing in an edge set, used by callers
/// that want a deterministic report of what a candidate set touches.
pub fn destination_triples(edges: &[(PromotionEdge, Action)]) -> BTreeSet<(String, String, String)> {
    edges
        .iter()
        .map(|(e, _)| {
            (
                e.dst_registry.to_string(),
                e.dst.name.to_string(),
                e.dst.tag.as_ref().map(|t| t.to_string()).unwrap_or_default(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::TagSlice;

    fn img(s: &str) -> ImageName {
        ImageName::new(s).unwrap()
    }
    fn reg(s: &str) -> RegistryName {
        RegistryName::new(s).unwrap()
    }
    fn tag(s: &str) -> Tag {
        Tag::parse(s).unwrap()
    }
    fn dig(c: char) -> Digest {
        Digest::parse(format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }

    fn manifest_one_image(dsts: &[&str]) -> Manifest {
        let mut yaml = "registries:\n  - name: gcr.io/foo\n    src: true\n".to_string();
        for name in dsts {
            yaml += &format!("  - name: {}\n", name);
        }
        yaml += &format!(
            "images:\n  - name: a\n    dmap:\n      \"{}\": [\"0.9\"]\n",
            dig('0')
        );
        Manifest::from_yaml(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn no_op_already_promoted() {
        let m = manifest_one_image(&["gcr.io/bar", "gcr.io/cat"]);
        let edges = to_promotion_edges(&[m]);

        let mut inventory = MasterInventory::new();
        for r in ["gcr.io/foo", "gcr.io/bar", "gcr.io/cat"] {
            let registry_inv = inventory.entry(reg(r));
            registry_inv.insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));
        }

        let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &InvIgnore::new());
        assert!(candidates.is_empty());
        assert!(clean);
    }

    #[test]
    fn single_add_when_destination_missing_image() {
        let m = manifest_one_image(&["gcr.io/bar"]);
        let edges = to_promotion_edges(&[m]);

        let mut inventory = MasterInventory::new();
        inventory
            .entry(reg("gcr.io/foo"))
            .insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));
        // gcr.io/bar has no entry at all.

        let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &InvIgnore::new());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1, Action::Add);
        assert!(clean);
        assert_eq!(candidates[0].0.dst_registry, reg("gcr.io/bar"));
    }

    #[test]
    fn tag_move_detected_when_destination_tag_points_elsewhere() {
        let m = manifest_one_image(&["gcr.io/bar"]);
        let edges = to_promotion_edges(&[m]);

        let mut inventory = MasterInventory::new();
        inventory
            .entry(reg("gcr.io/foo"))
            .insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));
        inventory
            .entry(reg("gcr.io/bar"))
            .insert(img("a"), dig('1'), TagSlice::new(vec![tag("0.9")]));

        let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &InvIgnore::new());
        assert!(!clean);
        assert_eq!(candidates.len(), 1);
        match &candidates[0].1 {
            Action::Move { old_digest } => assert_eq!(old_digest, &dig('1')),
            other => panic!("expected Move, got {:?}", other),
        }
    }

    #[test]
    fn lost_image_is_dropped_not_promoted() {
        let m = manifest_one_image(&["gcr.io/bar"]);
        let edges = to_promotion_edges(&[m]);

        // Source registry inventory doesn't contain the digest at all.
        let inventory = MasterInventory::new();
        let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &InvIgnore::new());
        assert!(candidates.is_empty());
        assert!(clean);
    }

    #[test]
    fn overlap_detection_flags_conflicting_tagged_edges() {
        let yaml_a = format!(
            "registries:\n  - name: gcr.io/foo\n    src: true\n  - name: gcr.io/bar\nimages:\n  - name: a\n    dmap:\n      \"{}\": [\"0.9\"]\n",
            dig('0')
        );
        let yaml_b = format!(
            "registries:\n  - name: gcr.io/qux\n    src: true\n  - name: gcr.io/bar\nimages:\n  - name: a\n    dmap:\n      \"{}\": [\"0.9\"]\n",
            dig('1')
        );
        let m1 = Manifest::from_yaml(yaml_a.as_bytes()).unwrap();
        let m2 = Manifest::from_yaml(yaml_b.as_bytes()).unwrap();
        let edges = to_promotion_edges(&[m1, m2]);
        assert!(check_overlapping_edges(edges).is_err());
    }

    #[test]
    fn idempotent_filter_is_clean_on_second_pass() {
        let m = manifest_one_image(&["gcr.io/bar"]);
        let edges = to_promotion_edges(&[m]);

        let mut inventory = MasterInventory::new();
        inventory
            .entry(reg("gcr.io/foo"))
            .insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));
        inventory
            .entry(reg("gcr.io/bar"))
            .insert(img("a"), dig('0'), TagSlice::new(vec![tag("0.9")]));

        let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &InvIgnore::new());
        assert!(candidates.is_empty());
        assert!(clean);
    }
}
