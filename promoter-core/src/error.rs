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

//! Stable error-kind table (spec §7).
//!
//! Each variant corresponds to exactly one `Kind` in the specification's
//! error table; the display message is what gets surfaced to a human
//! operator or logged by the caller.

use thiserror::Error;

/// A structured error kind produced anywhere in the promotion engine.
#[derive(Error, Debug)]
pub enum PromoterError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("overlapping edges: destination {registry}/{image}:{tag} is claimed by both digest {first} and digest {second}")]
    OverlappingEdges {
        registry: String,
        image: String,
        tag: String,
        first: String,
        second: String,
    },

    #[error("lost image: digest {digest} for {image} not found in source registry {registry}")]
    LostImage {
        registry: String,
        image: String,
        digest: String,
    },

    #[error("registry read failed for {image} on {registry} after retries: {reason}")]
    RegistryReadFailed {
        registry: String,
        image: String,
        reason: String,
    },

    #[error("unknown media type for digest {digest}: {raw}")]
    UnknownMediaType { digest: String, raw: String },

    #[error("producer failed for {context}: {reason}")]
    ProducerFailed { context: String, reason: String },

    #[error("overlapping tag move: {registry}/{image}:{tag} would move digest {old} -> {new} but is also targeted as a plain add")]
    OverlappingTagMove {
        registry: String,
        image: String,
        tag: String,
        old: String,
        new: String,
    },

    #[error("vulnerability threshold exceeded for {count} image(s)")]
    VulnerabilityExceeded { count: usize },

    #[error("{0} error(s) encountered during the prechecks")]
    PreCheckAggregate(usize),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest yaml: {0}")]
    Yaml(#[from] serde_yml::Error),
}

pub type Result<T> = std::result::Result<T, PromoterError>;
