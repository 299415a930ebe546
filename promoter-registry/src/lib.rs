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

//! Concurrent registry I/O and promotion dispatch (spec §4.4, §4.5, §5).
//!
//! Everything in `promoter-core` is pure; this crate supplies the
//! worker-pool/wait-group concurrency model around it and the trait
//! seams (`RegistryReader`, `ActionProducer`) that a caller's transport
//! implementation plugs into.

pub mod executor;
pub mod metrics;
pub mod reader;

pub use executor::{dispatch, render_dry_run_report, DispatchReport, ExecOptions, Outcome};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reader::{read_manifest_lists, read_registries, ManifestInfo, ReadOptions, RegistryContext, RegistryReader, RepoListing};
