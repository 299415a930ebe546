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

//! Command-line surface (spec §6). All argument parsing lives here; the
//! rest of the binary never touches `std::env::args` directly.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use promoter_core::precheck::Severity;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Csv,
}

#[derive(Debug, Parser)]
#[command(name = "promoter", about = "Reconcile container registries against a declarative manifest")]
pub struct Cli {
    /// Path to a single promoter manifest YAML file. Repeatable.
    #[arg(long = "manifest", value_name = "PATH")]
    pub manifest: Vec<PathBuf>,

    /// Root of a thin-manifest directory tree (manifests/<group>/promoter-manifest.yaml
    /// paired with images/<group>/images.yaml).
    #[arg(long = "thin-manifest-dir", value_name = "DIR")]
    pub thin_manifest_dir: Option<PathBuf>,

    /// Dump the observed inventory of this registry instead of promoting.
    #[arg(long = "snapshot", value_name = "REGISTRY")]
    pub snapshot: Option<String>,

    /// Dump the inventory of this registry as it would look if every
    /// loaded manifest were already fully promoted.
    #[arg(long = "manifest-based-snapshot-of", value_name = "REGISTRY")]
    pub manifest_based_snapshot_of: Option<String>,

    #[arg(long = "output", value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,

    /// Number of concurrent workers for both the registry reader and the executor.
    #[arg(long = "threads", default_value_t = 10)]
    pub threads: usize,

    /// Minimum fixable vulnerability severity that fails the run
    /// (0=low, 1=medium, 2=high, 3=critical). Negative disables the check.
    #[arg(long = "severity-threshold", default_value_t = -1)]
    pub severity_threshold: i64,

    /// Actually dispatch promotion actions. Without this flag the run is
    /// a dry-run: actions are captured and reported, never executed.
    #[arg(long = "confirm", default_value_t = false)]
    pub confirm: bool,

    /// Acquire a short-lived credential via the configured service account
    /// before reading or promoting.
    #[arg(long = "use-service-account", default_value_t = false)]
    pub use_service_account: bool,

    /// Elide manifest-list children already referenced by a promoted
    /// parent digest from a `--snapshot` dump.
    #[arg(long = "minimal-snapshot", default_value_t = false)]
    pub minimal_snapshot: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn severity(&self) -> Option<Severity> {
        if self.severity_threshold < 0 {
            return None;
        }
        Some(match self.severity_threshold {
            0 => Severity::Low,
            1 => Severity::Medium,
            2 => Severity::High,
            _ => Severity::Critical,
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_threshold_disables_vulnerability_check() {
        let cli = Cli::parse_from(["promoter", "--severity-threshold", "-1"]);
        assert_eq!(cli.severity(), None);
    }

    #[test]
    fn threshold_maps_to_severity_levels() {
        let cli = Cli::parse_from(["promoter", "--severity-threshold", "2"]);
        assert_eq!(cli.severity(), Some(Severity::High));
    }

    #[test]
    fn verbosity_count_maps_to_level_filter() {
        let cli = Cli::parse_from(["promoter", "-vv"]);
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
    }
}
