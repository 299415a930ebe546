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

//! Entity model, manifest validation, edge building and pre-checks for
//! the image promotion engine.
//!
//! This crate is pure data and algorithms: no network I/O, no threads.
//! The registry reader and executor that drive it concurrently live in
//! `promoter-registry`.

pub mod edge;
pub mod entity;
pub mod error;
pub mod inventory;
pub mod manifest;
pub mod precheck;
pub mod producer;
pub mod snapshot;

pub use error::{PromoterError, Result};
