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

//! The one trait seam this binary ships with no transport behind it
//! (spec §1 Non-goal: "implementing the container-registry HTTP API
//! itself"). A real deployment supplies its own [`RegistryReader`]; this
//! stub exists only so the pipeline wires together and fails loudly and
//! specifically instead of refusing to compile or link.

use promoter_core::entity::Digest;
use promoter_registry::reader::{RegistryContext, RegistryReader, RepoListing};

pub struct UnimplementedRegistryReader;

impl RegistryReader for UnimplementedRegistryReader {
    fn list_repository(&self, ctx: &RegistryContext) -> Result<RepoListing, String> {
        Err(format!(
            "no registry transport configured for {}/{}: supply a RegistryReader implementation",
            ctx.registry, ctx.repository
        ))
    }

    fn read_manifest_list(&self, ctx: &RegistryContext, digest: &Digest) -> Result<Vec<Digest>, String> {
        Err(format!(
            "no registry transport configured for {} (manifest list {})",
            ctx.registry, digest
        ))
    }
}
