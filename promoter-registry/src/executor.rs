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

//! Dispatches the candidate edge set as concurrent promotion actions
//! (spec §4.5). Each candidate is re-checked against the set of
//! destinations already claimed this run before it is handed to a
//! [`Producer`] — a genuine race guard, not a cache, since two edges in
//! the same candidate set can never legally target the same destination
//! triple, but a bug upstream (or a future relaxation of that invariant)
//! should fail loud rather than double-dispatch silently.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::sync::Mutex;

use crossbeam::channel::bounded;
use log::{debug, warn};

use promoter_core::edge::{Action, PromotionEdge};
use promoter_core::entity::{ImageName, RegistryName, Tag};
use promoter_core::producer::{ActionProducer, PromotionRequest, RequestOp};

use crate::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub workers: usize,
    pub dry_run: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            dry_run: false,
        }
    }
}

/// The full result of one dispatch pass: per-request outcomes, plus (in
/// dry-run mode) a histogram of how many times each distinct request
/// would have been issued (spec §4.5 "Dry-run").
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub results: Vec<(PromotionRequest, Outcome)>,
    pub dry_run_histogram: BTreeMap<PromotionRequest, usize>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, o)| *o == Outcome::Success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Render a dry-run histogram the way a run summary would (spec §6
/// "dry-run prints the requests it would have issued").
pub fn render_dry_run_report(histogram: &BTreeMap<PromotionRequest, usize>) -> String {
    let mut out = String::new();
    for (request, count) in histogram {
        out.push_str(&format!(
            "{:?} {}@{} -> {}/{} x{}\n",
            request.op, request.src_registry, request.src_image, request.dst_registry, request.dst_image, count
        ));
    }
    out
}

type DestinationKey = (RegistryName, ImageName, Option<Tag>);

fn destination_key(edge: &PromotionEdge) -> DestinationKey {
    (edge.dst_registry.clone(), edge.dst.name.clone(), edge.dst.tag.clone())
}

fn to_request(edge: &PromotionEdge, action: &Action) -> PromotionRequest {
    PromotionRequest {
        src_registry: edge.src_registry.clone(),
        src_image: edge.src.name.clone(),
        dst_registry: edge.dst_registry.clone(),
        dst_image: edge.dst.name.clone(),
        digest: edge.digest.clone(),
        tag: edge.dst.tag.clone(),
        op: RequestOp::from(action),
    }
}

/// Run every `(edge, action)` pair through `producer`, `opts.workers`
/// deep, and collect outcomes (spec §4.5, §5). In dry-run mode no
/// `Producer` is built at all; requests are only tallied.
pub fn dispatch(
    candidates: &[(PromotionEdge, Action)],
    producer: &dyn ActionProducer,
    opts: &ExecOptions,
    metrics: &Metrics,
) -> DispatchReport {
    let results = Mutex::new(Vec::new());
    let histogram: Mutex<BTreeMap<PromotionRequest, usize>> = Mutex::new(BTreeMap::new());
    let claimed: Mutex<HashSet<DestinationKey>> = Mutex::new(HashSet::new());

    let (tx, rx) = bounded::<(PromotionEdge, Action)>(opts.workers.max(1));

    crossbeam::thread::scope(|scope| {
        for _ in 0..opts.workers.max(1) {
            let rx = rx.clone();
            let results = &results;
            let histogram = &histogram;
            let claimed = &claimed;
            scope.spawn(move |_| {
                while let Ok((edge, action)) = rx.recv() {
                    let key = destination_key(&edge);
                    {
                        let mut claimed = claimed.lock().expect("mutex never poisoned");
                        if !claimed.insert(key) {
                            warn!(
                                "dispatch-time recheck: destination {}/{} already claimed this run, skipping",
                                edge.dst_registry, edge.dst.name
                            );
                            continue;
                        }
                    }

                    let request = to_request(&edge, &action);
                    metrics.promotions_attempted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                    if opts.dry_run {
                        let mut hist = histogram.lock().expect("mutex never poisoned");
                        *hist.entry(request.clone()).or_insert(0) += 1;
                        results.lock().expect("mutex never poisoned").push((request, Outcome::Success));
                        continue;
                    }

                    let context_label = format!("{}/{}", edge.dst_registry, edge.dst.name);
                    let mut prod = producer.build(&request);
                    let outcome = match prod.produce() {
                        Ok((mut stdout, mut stderr)) => {
                            // Drain stdout and stderr on separate threads: the
                            // child can fill either OS pipe buffer while we're
                            // blocked reading the other, so sequential reads
                            // can deadlock it.
                            let stdout_reader = std::thread::spawn(move || {
                                let mut buf = String::new();
                                stdout
                                    .read_to_string(&mut buf)
                                    .map(|_| buf)
                                    .map_err(|e| format!("reading process stdout: {e}"))
                            });
                            let stderr_reader = std::thread::spawn(move || {
                                let mut buf = String::new();
                                stderr
                                    .read_to_string(&mut buf)
                                    .map(|_| buf)
                                    .map_err(|e| format!("reading process stderr: {e}"))
                            });
                            let out_result = stdout_reader
                                .join()
                                .unwrap_or_else(|_| Err("stdout reader thread panicked".to_string()));
                            let err_result = stderr_reader
                                .join()
                                .unwrap_or_else(|_| Err("stderr reader thread panicked".to_string()));

                            match (out_result, err_result) {
                                (Ok(out_buf), Ok(err_buf)) => {
                                    if !out_buf.trim().is_empty() {
                                        debug!("{}: {}", context_label, out_buf.trim());
                                    }
                                    if !err_buf.trim().is_empty() {
                                        warn!("{}: {}", context_label, err_buf.trim());
                                    }
                                    Outcome::Success
                                }
                                (Err(reason), _) | (_, Err(reason)) => Outcome::Failed(reason),
                            }
                        }
                        Err(err) => Outcome::Failed(format!("running process: {err}")),
                    };
                    if let Err(err) = prod.close() {
                        warn!("closing process for {}: {}", context_label, err);
                    }

                    match &outcome {
                        Outcome::Success => metrics.promotions_succeeded.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                        Outcome::Failed(reason) => {
                            warn!("promotion failed for {}/{}: {}", edge.dst_registry, edge.dst.name, reason);
                            metrics.promotions_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                        }
                    };
                    results.lock().expect("mutex never poisoned").push((request, outcome));
                }
            });
        }

        for candidate in candidates {
            tx.send(candidate.clone()).expect("workers outlive the send loop");
        }
        drop(tx);
    })
    .expect("worker threads never panic under normal operation");

    DispatchReport {
        results: results.into_inner().expect("mutex never poisoned"),
        dry_run_histogram: histogram.into_inner().expect("mutex never poisoned"),
    }
}
