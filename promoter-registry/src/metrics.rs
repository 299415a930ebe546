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

//! Process-wide counters for one promotion run, reported at the end of a
//! run (spec §6 "summary line") rather than exported to a metrics backend
//! — there is no scrape endpoint in this crate (spec §1 Non-goals).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub read_attempts: AtomicU64,
    pub read_failures: AtomicU64,
    pub promotions_attempted: AtomicU64,
    pub promotions_succeeded: AtomicU64,
    pub promotions_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read_attempts: self.read_attempts.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            promotions_attempted: self.promotions_attempted.load(Ordering::Relaxed),
            promotions_succeeded: self.promotions_succeeded.load(Ordering::Relaxed),
            promotions_failed: self.promotions_failed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`Metrics`], suitable for logging or display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub read_attempts: u64,
    pub read_failures: u64,
    pub promotions_attempted: u64,
    pub promotions_succeeded: u64,
    pub promotions_failed: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads: {}/{} failed; promotions: {}/{} attempted, {} failed",
            self.read_failures,
            self.read_attempts,
            self.promotions_succeeded,
            self.promotions_attempted,
            self.promotions_failed
        )
    }
}
