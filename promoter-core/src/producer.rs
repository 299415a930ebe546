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

//! The external interfaces the core consumes (spec §6): `ActionProducer`,
//! `Producer`, `TokenProvider`. Concrete implementations (subprocess
//! registry CLI invocation, cloud token acquisition) are external
//! collaborators per spec §1 and live outside this crate.

use std::io::Read;

use crate::edge::Action;
use crate::entity::{Digest, ImageName, RegistryName, Tag};
use crate::error::PromoterError;

/// One promotion request, fully resolved: what to copy/retag/delete and
/// where. Used both to build a [`Producer`] and as the histogram key for
/// dry-run capture (spec §4.5 "Dry-run").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromotionRequest {
    pub src_registry: RegistryName,
    pub src_image: ImageName,
    pub dst_registry: RegistryName,
    pub dst_image: ImageName,
    pub digest: Digest,
    pub tag: Option<Tag>,
    pub op: RequestOp,
}

/// The action opcode carried by a request (spec §6 "Action opcodes").
/// `Move` carries both the old and new digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestOp {
    Add,
    Move { old_digest: Digest },
    Delete,
}

impl From<&Action> for RequestOp {
    fn from(action: &Action) -> Self {
        match action {
            Action::Add => RequestOp::Add,
            Action::Move { old_digest } => RequestOp::Move {
                old_digest: old_digest.clone(),
            },
            Action::Delete => RequestOp::Delete,
        }
    }
}

/// A running (or about-to-run) realization of one [`PromotionRequest`].
/// Implementations own whatever resource performs the action (a
/// subprocess, an HTTP call) and must release it on every exit path.
pub trait Producer: Send {
    /// Start the action and return its stdout/stderr as readers.
    fn produce(&mut self) -> Result<(Box<dyn Read + Send>, Box<dyn Read + Send>), PromoterError>;

    /// Release any resources held by this producer. Called exactly once,
    /// on every exit path (success, error, cancellation).
    fn close(&mut self) -> Result<(), PromoterError>;
}

/// Builds a [`Producer`] for one promotion request (spec §6
/// `ActionProducer`).
pub trait ActionProducer: Send + Sync {
    fn build(&self, request: &PromotionRequest) -> Box<dyn Producer>;
}

/// A short-lived credential for one service account (spec §1 `TokenProvider`).
pub trait TokenProvider {
    fn token(&self, service_account: &str, use_service_account: bool) -> Result<String, PromoterError>;
}
