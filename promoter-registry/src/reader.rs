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

//! Concurrent registry reading (spec §4.4, §5).
//!
//! The worker pool seeds one job per top-level [`RegistryContext`]; each
//! completed `list_repository` call may enqueue jobs for newly-discovered
//! child repositories. A [`crossbeam::sync::WaitGroup`] clone travels with
//! every queued job and is dropped when that job (and everything it
//! spawned) finishes, so the driver can block on transitive completion
//! without guessing how deep the repository tree goes.
//!
//! Every worker holds its own `Sender` clone for as long as it runs, since
//! it must be able to enqueue children it discovers — which means the
//! work channel never disconnects on its own (the live senders *are* the
//! workers). Completion is instead signalled by an `AtomicBool` the
//! driver flips only after `wg.wait()` returns; idle workers notice it on
//! their next `recv_timeout` poll and exit. Closing the channel itself
//! the moment the wait-group drains would still race a worker trying to
//! enqueue a newly-discovered child, which is why this signal is separate
//! from the channel's lifecycle entirely.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{bounded, Sender};
use crossbeam::sync::WaitGroup;
use log::{debug, error, warn};

use promoter_core::entity::{Digest, ImageName, RegistryName, Tag};
use promoter_core::inventory::{DigestMediaType, InvIgnore, MasterInventory, MediaType, ParentDigest};

use crate::metrics::Metrics;

/// One registry + repository root to scan (spec §4.4 `RegistryContext`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryContext {
    pub registry: RegistryName,
    pub repository: ImageName,
}

/// Per-digest manifest info returned by a repository listing (spec §6
/// `RepoListing`).
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub tags: Vec<Tag>,
    pub media_type_raw: String,
    pub size: Option<u64>,
    pub created_ms: Option<i64>,
    pub uploaded_ms: Option<i64>,
}

/// The result of one `ListRepository` call (spec §6 `RepoListing`).
#[derive(Debug, Clone, Default)]
pub struct RepoListing {
    pub name: String,
    pub children: Vec<ImageName>,
    pub manifests: BTreeMap<Digest, ManifestInfo>,
}

/// The capability the core consumes for registry I/O (spec §4.4, §6).
/// Implementations perform the actual HTTP calls; that transport is
/// outside this engine's scope (spec §1 Non-goals).
pub trait RegistryReader: Send + Sync {
    fn list_repository(&self, ctx: &RegistryContext) -> Result<RepoListing, String>;

    fn read_manifest_list(
        &self,
        ctx: &RegistryContext,
        digest: &Digest,
    ) -> Result<Vec<Digest>, String>;
}

fn classify_media_type(raw: &str) -> Option<MediaType> {
    match raw {
        "application/vnd.docker.distribution.manifest.list.v2+json" => Some(MediaType::ManifestList),
        "application/vnd.docker.distribution.manifest.v1+json" => Some(MediaType::ManifestV2Schema1),
        "application/vnd.docker.distribution.manifest.v1+prettyjws" => {
            Some(MediaType::ManifestV2Schema1Signed)
        }
        "application/vnd.docker.distribution.manifest.v2+json" => Some(MediaType::ManifestV2Schema2),
        _ => None,
    }
}

struct SharedState {
    inventory: MasterInventory,
    media_types: DigestMediaType,
    ignore: InvIgnore,
    /// Where each digest was first observed, so the manifest-list pass
    /// knows which `(registry, repository)` to query.
    digest_origin: BTreeMap<Digest, RegistryContext>,
}

/// Bounded retry with exponential backoff around a fallible operation
/// (spec §4.4 "Each job uses exponential backoff around the network
/// call"). `base_delay` doubles after every failed attempt.
fn with_backoff<T>(
    mut attempt: impl FnMut() -> Result<T, String>,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, String> {
    let mut delay = base_delay;
    let mut last_err = String::new();
    for n in 0..max_attempts {
        match attempt() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = e;
                if n + 1 < max_attempts {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err)
}

/// Options controlling the concurrent read (worker count, retry policy).
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub workers: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// How often an idle worker re-checks the wait-group-drained flag once its
/// queue looks empty. Short enough that the driver returns promptly, long
/// enough to not spin.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Recursively read every repository reachable from `roots`, building a
/// `MasterInventory` plus `DigestMediaType` (spec §4.4). Returns the
/// observed state and the ignore set of images whose read failed after
/// retries.
pub fn read_registries(
    roots: &[RegistryContext],
    reader: &dyn RegistryReader,
    opts: &ReadOptions,
    metrics: &Metrics,
) -> (MasterInventory, DigestMediaType, InvIgnore) {
    let shared = Mutex::new(SharedState {
        inventory: MasterInventory::new(),
        media_types: DigestMediaType::new(),
        ignore: InvIgnore::new(),
        digest_origin: BTreeMap::new(),
    });

    let (tx, rx) = bounded::<Job>(opts.workers.max(1));
    let wg = WaitGroup::new();

    for ctx in roots {
        let job = Job {
            ctx: ctx.clone(),
            _wg: wg.clone(),
        };
        // A bounded channel full at startup would mean more roots than
        // workers; send still succeeds once a worker drains it.
        tx.send(job).expect("receiver outlives initial seeding");
    }

    // Every worker keeps its own `Sender` clone alive for as long as it is
    // running, since it must be able to enqueue newly-discovered child
    // repositories. That means the channel never disconnects on its own:
    // the live senders *are* the workers. Completion is instead signalled
    // by `drained`, flipped by the waiter thread below only once
    // `wg.wait()` returns — which, because every `Job` (queued or
    // in-flight) carries its own wait-group clone, cannot happen while any
    // work remains queued or running.
    let drained = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    crossbeam::thread::scope(|scope| {
        for worker_id in 0..opts.workers.max(1) {
            let rx = rx.clone();
            let tx = tx.clone();
            let shared = &shared;
            let drained = drained.clone();
            scope.spawn(move |_| {
                worker_loop(worker_id, rx, tx, reader, opts, shared, metrics, &drained);
            });
        }

        // Dropping our own sender handle here (after seeding, before the
        // waiter) ensures the channel's refcount only reflects workers +
        // the waiter thread below, not a leftover top-level handle.
        drop(tx);

        // Block until every enqueued job (and everything it transitively
        // spawned) has finished, then flip `drained` so idle workers stop
        // polling and return.
        let drained = drained.clone();
        scope.spawn(move |_| {
            wg.wait();
            drained.store(true, std::sync::atomic::Ordering::Release);
        });
    })
    .expect("worker threads never panic under normal operation");

    let guard = shared.into_inner().expect("mutex never poisoned: no worker panics");
    (guard.inventory, guard.media_types, guard.ignore)
}

struct Job {
    ctx: RegistryContext,
    _wg: WaitGroup,
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    _worker_id: usize,
    rx: crossbeam::channel::Receiver<Job>,
    tx: Sender<Job>,
    reader: &dyn RegistryReader,
    opts: &ReadOptions,
    shared: &Mutex<SharedState>,
    metrics: &Metrics,
    drained: &std::sync::atomic::AtomicBool,
) {
    loop {
        let job = match rx.recv_timeout(IDLE_POLL_INTERVAL) {
            Ok(job) => job,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                if drained.load(std::sync::atomic::Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        };

        metrics.read_attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let wg_for_children = job._wg.clone();
        let ctx = job.ctx.clone();

        let result = with_backoff(
            || reader.list_repository(&ctx).map_err(|e| e.to_string()),
            opts.max_attempts,
            opts.base_delay,
        );

        match result {
            Ok(listing) => {
                debug!("listed repository {} ({} children)", ctx.repository, listing.children.len());
                {
                    let mut guard = shared.lock().expect("mutex never poisoned");
                    let registry_inv = guard.inventory.entry(ctx.registry.clone());
                    for (digest, info) in &listing.manifests {
                        registry_inv.insert(
                            ctx.repository.clone(),
                            digest.clone(),
                            promoter_core::inventory::TagSlice::new(info.tags.clone()),
                        );
                        match classify_media_type(&info.media_type_raw) {
                            Some(mt) => guard.media_types.insert(digest.clone(), mt),
                            None => warn!("unknown media type '{}' for digest {}", info.media_type_raw, digest),
                        }
                        guard.digest_origin.entry(digest.clone()).or_insert_with(|| ctx.clone());
                    }
                }
                for child in listing.children {
                    let child_ctx = RegistryContext {
                        registry: ctx.registry.clone(),
                        repository: child,
                    };
                    let child_job = Job {
                        ctx: child_ctx,
                        _wg: wg_for_children.clone(),
                    };
                    if tx.send(child_job).is_err() {
                        error!("work channel closed while enqueueing child repository");
                    }
                }
            }
            Err(reason) => {
                metrics.read_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                error!("registry read failed for {} on {} after retries: {}", ctx.repository, ctx.registry, reason);
                let mut guard = shared.lock().expect("mutex never poisoned");
                guard.ignore.mark(ctx.repository.clone());
            }
        }
    }
}

/// Second pass (spec §4.4 "Manifest-list pass"): for each digest
/// classified as a manifest list, fetch its children and record
/// `ParentDigest[child] = parent`.
pub fn read_manifest_lists(
    media_types: &DigestMediaType,
    reader: &dyn RegistryReader,
    origins: impl Fn(&Digest) -> Option<RegistryContext>,
) -> ParentDigest {
    let mut parents = ParentDigest::new();
    for parent_digest in media_types.manifest_lists() {
        let Some(ctx) = origins(parent_digest) else {
            warn!("no known origin for manifest-list digest {}, skipping", parent_digest);
            continue;
        };
        match reader.read_manifest_list(&ctx, parent_digest) {
            Ok(children) => {
                for child in children {
                    parents.insert(child, parent_digest.clone());
                }
            }
            Err(reason) => {
                error!("failed to read manifest list for {}: {}", parent_digest, reason);
            }
        }
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reg(s: &str) -> RegistryName {
        RegistryName::new(s).unwrap()
    }
    fn img(s: &str) -> ImageName {
        ImageName::new(s).unwrap()
    }

    /// A fake reader that reproduces the recursive scenario of spec §8.6:
    /// `foo` has children `[addon-resizer, pause]`, `foo/pause` has child
    /// `childLevel1`, `foo/pause/childLevel1` has child `childLevel2`.
    struct FakeReader {
        listings: HashMap<String, RepoListing>,
        calls: AtomicUsize,
    }

    impl RegistryReader for FakeReader {
        fn list_repository(&self, ctx: &RegistryContext) -> Result<RepoListing, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.listings
                .get(ctx.repository.as_str())
                .cloned()
                .ok_or_else(|| format!("no fake listing for {}", ctx.repository))
        }

        fn read_manifest_list(&self, _ctx: &RegistryContext, _digest: &Digest) -> Result<Vec<Digest>, String> {
            Ok(vec![])
        }
    }

    fn digest(c: char) -> Digest {
        Digest::parse(format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }

    fn leaf_listing(name: &str, digest_char: char) -> RepoListing {
        let mut manifests = BTreeMap::new();
        manifests.insert(
            digest(digest_char),
            ManifestInfo {
                tags: vec![],
                media_type_raw: "application/vnd.docker.distribution.manifest.v2+json".into(),
                size: None,
                created_ms: None,
                uploaded_ms: None,
            },
        );
        RepoListing {
            name: name.to_string(),
            children: vec![],
            manifests,
        }
    }

    #[test]
    fn recursive_read_discovers_every_nested_repository() {
        let mut listings = HashMap::new();
        listings.insert(
            "foo".to_string(),
            RepoListing {
                name: "foo".into(),
                children: vec![img("foo/addon-resizer"), img("foo/pause")],
                manifests: BTreeMap::new(),
            },
        );
        listings.insert("foo/addon-resizer".to_string(), leaf_listing("foo/addon-resizer", '0'));
        listings.insert(
            "foo/pause".to_string(),
            RepoListing {
                name: "foo/pause".into(),
                children: vec![img("foo/pause/childLevel1")],
                manifests: BTreeMap::from([(
                    digest('1'),
                    ManifestInfo {
                        tags: vec![],
                        media_type_raw: "application/vnd.docker.distribution.manifest.v2+json".into(),
                        size: None,
                        created_ms: None,
                        uploaded_ms: None,
                    },
                )]),
            },
        );
        listings.insert(
            "foo/pause/childLevel1".to_string(),
            RepoListing {
                name: "foo/pause/childLevel1".into(),
                children: vec![img("foo/pause/childLevel1/childLevel2")],
                manifests: BTreeMap::from([(
                    digest('2'),
                    ManifestInfo {
                        tags: vec![],
                        media_type_raw: "application/vnd.docker.distribution.manifest.v2+json".into(),
                        size: None,
                        created_ms: None,
                        uploaded_ms: None,
                    },
                )]),
            },
        );
        listings.insert(
            "foo/pause/childLevel1/childLevel2".to_string(),
            leaf_listing("foo/pause/childLevel1/childLevel2", '3'),
        );

        let reader = FakeReader {
            listings,
            calls: AtomicUsize::new(0),
        };
        let roots = vec![RegistryContext {
            registry: reg("gcr.io/foo"),
            repository: img("foo"),
        }];
        let metrics = Metrics::default();
        let (inventory, _media, ignore) =
            read_registries(&roots, &reader, &ReadOptions::default(), &metrics);

        let registry_inv = inventory.registry(&reg("gcr.io/foo")).unwrap();
        for name in [
            "foo/addon-resizer",
            "foo/pause",
            "foo/pause/childLevel1",
            "foo/pause/childLevel1/childLevel2",
        ] {
            assert!(
                registry_inv.images().any(|i| i.as_str() == name),
                "missing image entry for {}",
                name
            );
        }
        assert!(!ignore.contains(&img("foo/addon-resizer")));
    }

    #[test]
    fn read_failure_after_retries_marks_ignore_but_does_not_abort() {
        let mut listings = HashMap::new();
        listings.insert(
            "foo".to_string(),
            RepoListing {
                name: "foo".into(),
                children: vec![img("foo/good"), img("foo/bad")],
                manifests: BTreeMap::new(),
            },
        );
        listings.insert("foo/good".to_string(), leaf_listing("foo/good", '0'));
        // "foo/bad" intentionally has no listing, so list_repository fails.

        let reader = FakeReader {
            listings,
            calls: AtomicUsize::new(0),
        };
        let roots = vec![RegistryContext {
            registry: reg("gcr.io/foo"),
            repository: img("foo"),
        }];
        let metrics = Metrics::default();
        let opts = ReadOptions {
            workers: 2,
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let (inventory, _media, ignore) = read_registries(&roots, &reader, &opts, &metrics);

        assert!(ignore.contains(&img("foo/bad")));
        let registry_inv = inventory.registry(&reg("gcr.io/foo")).unwrap();
        assert!(registry_inv.images().any(|i| i.as_str() == "foo/good"));
    }
}
