// Copyright 2026 locus Project Authors
//
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

//! locus - the lookup core of a service registry.
//!
//! Given a servant id, locus hands out the endpoints implementing it, filtered by IP-derived groups, set partitions
//! and station priorities. Lookups read an in-memory snapshot and never block. A refresher rebuilds the snapshot from
//! the persistent store in the background.

/// External collaborators.
pub mod collaborator;
/// Registry configuration.
pub mod config;
pub mod load;
/// Registry counters.
pub mod metrics;
mod prelude;
pub mod refresher;
/// The registry service object.
pub mod registry;
pub mod resolver;
pub mod store;
#[cfg(test)]
mod test_utils;

pub use prelude::*;
