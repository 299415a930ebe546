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

//! Pre-check harness (spec §4.6): a list of pluggable checks run against
//! the candidate edge set before execution.

use std::collections::{BTreeSet, HashSet};

use crate::edge::{Action, PromotionEdge};
use crate::error::PromoterError;

/// Anything that can be run as a pre-check. Implementations decide for
/// themselves what "failure" means; the harness only aggregates.
pub trait PreCheck {
    fn run(&self) -> Result<(), PromoterError>;
}

/// Run every check in order, accumulating failures, and return
/// `PreCheckAggregate` if any failed (spec §4.6).
pub fn run_checks(checks: &[Box<dyn PreCheck>]) -> Result<(), PromoterError> {
    let mut failures = 0;
    for check in checks {
        if let Err(err) = check.run() {
            log::error!("precheck failed: {err}");
            failures += 1;
        }
    }
    if failures > 0 {
        return Err(PromoterError::PreCheckAggregate(failures));
    }
    Ok(())
}

/// Compares the destination edge sets derived from two manifest
/// snapshots (a base and a candidate) and fails if any destination edge
/// present in the base disappears in the candidate (spec §4.6
/// "image-removal").
pub struct ImageRemovalCheck {
    base: HashSet<PromotionEdge>,
    candidate: HashSet<PromotionEdge>,
}

impl ImageRemovalCheck {
    pub fn new(base: HashSet<PromotionEdge>, candidate: HashSet<PromotionEdge>) -> Self {
        Self { base, candidate }
    }

    fn removed(&self) -> Vec<&PromotionEdge> {
        self.base.difference(&self.candidate).collect()
    }
}

impl PreCheck for ImageRemovalCheck {
    fn run(&self) -> Result<(), PromoterError> {
        let removed = self.removed();
        if removed.is_empty() {
            return Ok(());
        }
        let mut names: Vec<String> = removed
            .iter()
            .map(|e| format!("{}/{}:{}", e.dst_registry, e.dst.name, e.dst.tag.as_ref().map(|t| t.as_str()).unwrap_or("")))
            .collect();
        names.sort();
        Err(PromoterError::InvalidManifest(format!(
            "{} destination edge(s) present in the base manifest are missing from the candidate: {}",
            names.len(),
            names.join(", ")
        )))
    }
}

/// Vulnerability severity levels, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One vulnerability finding for a digest.
#[derive(Debug, Clone, Copy)]
pub struct VulnFinding {
    pub severity: Severity,
    pub fixable: bool,
}

/// An external vulnerability-scanning collaborator (spec §1, §6): given a
/// digest, returns its findings. Implementing the actual scan is outside
/// this engine's scope.
pub trait ImageVulnProducer {
    fn findings(&self, digest: &str) -> Vec<VulnFinding>;
}

/// Invokes an [`ImageVulnProducer`] per edge digest, filters to fixable
/// findings at or above a severity threshold, and reports one line per
/// offending image, sorted by name then digest (spec §4.6
/// "vulnerability"). A negative threshold disables the check entirely
/// (spec §6 `--severity-threshold`).
pub struct VulnerabilityCheck<'a> {
    edges: &'a [(PromotionEdge, Action)],
    producer: &'a dyn ImageVulnProducer,
    threshold: Option<Severity>,
}

impl<'a> VulnerabilityCheck<'a> {
    pub fn new(
        edges: &'a [(PromotionEdge, Action)],
        producer: &'a dyn ImageVulnProducer,
        threshold: Option<Severity>,
    ) -> Self {
        Self {
            edges,
            producer,
            threshold,
        }
    }
}

impl<'a> PreCheck for VulnerabilityCheck<'a> {
    fn run(&self) -> Result<(), PromoterError> {
        let Some(threshold) = self.threshold else {
            return Ok(());
        };

        // Dedup by (image, digest): the same digest may appear in
        // multiple edges (fan-out to several destinations).
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let mut offenders: Vec<(String, usize, usize)> = Vec::new();

        for (edge, _) in self.edges {
            let key = (edge.src.name.to_string(), edge.digest.to_string());
            if !seen.insert(key.clone()) {
                continue;
            }
            let findings = self.producer.findings(edge.digest.as_str());
            let fixable_severe = findings
                .iter()
                .filter(|f| f.fixable && f.severity >= threshold)
                .count();
            if fixable_severe > 0 {
                offenders.push((
                    format!("{}@{}", edge.src.name, edge.digest),
                    fixable_severe,
                    findings.len(),
                ));
            }
        }

        if offenders.is_empty() {
            return Ok(());
        }

        offenders.sort_by(|a, b| a.0.cmp(&b.0));
        for (label, fixable_severe, total) in &offenders {
            log::error!(
                "{}: [{} fixable severe vulnerabilities, {} total]",
                label,
                fixable_severe,
                total
            );
        }

        Err(PromoterError::VulnerabilityExceeded {
            count: offenders.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Digest, ImageName, RegistryName, Tag};
    use crate::edge::ImageTag;

    fn edge(image: &str, digest: char) -> (PromotionEdge, Action) {
        let d = Digest::parse(format!("sha256:{}", digest.to_string().repeat(64))).unwrap();
        (
            PromotionEdge {
                src_registry: RegistryName::new("gcr.io/foo").unwrap(),
                src: ImageTag {
                    name: ImageName::new(image).unwrap(),
                    tag: Some(Tag::parse("0.9").unwrap()),
                },
                digest: d,
                dst_registry: RegistryName::new("gcr.io/bar").unwrap(),
                dst: ImageTag {
                    name: ImageName::new(image).unwrap(),
                    tag: Some(Tag::parse("0.9").unwrap()),
                },
            },
            Action::Add,
        )
    }

    struct FakeProducer {
        map: std::collections::HashMap<String, Vec<VulnFinding>>,
    }

    impl ImageVulnProducer for FakeProducer {
        fn findings(&self, digest: &str) -> Vec<VulnFinding> {
            self.map.get(digest).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn vulnerability_gate_fails_at_high_threshold() {
        let d0 = "sha256:".to_string() + &"0".repeat(64);
        let d1 = "sha256:".to_string() + &"1".repeat(64);
        let d2 = "sha256:".to_string() + &"2".repeat(64);

        let mut map = std::collections::HashMap::new();
        map.insert(
            d0.clone(),
            vec![VulnFinding {
                severity: Severity::High,
                fixable: true,
            }],
        );
        map.insert(
            d1.clone(),
            vec![VulnFinding {
                severity: Severity::High,
                fixable: true,
            }],
        );
        map.insert(
            d2.clone(),
            vec![VulnFinding {
                severity: Severity::Low,
                fixable: true,
            }],
        );
        let producer = FakeProducer { map };

        let edges = vec![edge("a", '0'), edge("b", '1'), edge("c", '2')];
        let check = VulnerabilityCheck::new(&edges, &producer, Some(Severity::High));
        assert!(check.run().is_err());
    }

    #[test]
    fn vulnerability_gate_passes_at_critical_threshold() {
        let d0 = "sha256:".to_string() + &"0".repeat(64);
        let mut map = std::collections::HashMap::new();
        map.insert(
            d0,
            vec![VulnFinding {
                severity: Severity::High,
                fixable: true,
            }],
        );
        let producer = FakeProducer { map };
        let edges = vec![edge("a", '0')];
        let check = VulnerabilityCheck::new(&edges, &producer, Some(Severity::Critical));
        assert!(check.run().is_ok());
    }

    #[test]
    fn disabled_threshold_always_passes() {
        let producer = FakeProducer {
            map: std::collections::HashMap::new(),
        };
        let edges = vec![edge("a", '0')];
        let check = VulnerabilityCheck::new(&edges, &producer, None);
        assert!(check.run().is_ok());
    }

    #[test]
    fn image_removal_check_fails_when_edge_disappears() {
        let mut base = HashSet::new();
        base.insert(edge("a", '0').0);
        base.insert(edge("b", '1').0);
        let mut candidate = HashSet::new();
        candidate.insert(edge("a", '0').0);

        let check = ImageRemovalCheck::new(base, candidate);
        assert!(check.run().is_err());
    }

    #[test]
    fn image_removal_check_passes_when_nothing_disappears() {
        let mut base = HashSet::new();
        base.insert(edge("a", '0').0);
        let candidate = base.clone();
        let check = ImageRemovalCheck::new(base, candidate);
        assert!(check.run().is_ok());
    }
}
