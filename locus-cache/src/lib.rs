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

//! In-memory caches behind service lookups.
//!
//! The caches are built by the load pipeline of `locus` and published together as a [`snapshot::RegistrySnapshot`].
//! Lookups only ever read them.

/// Endpoint address parsing and endpoint records.
pub mod endpoint;
/// Group rules and the group priority table.
pub mod group;
/// Active and inactive endpoints per servant.
pub mod objects;
/// Re-exports of the commonly used types.
pub mod prelude;
/// Set division membership.
pub mod set;
/// One published generation of all caches.
pub mod snapshot;
/// Per-instance admin and flow state.
pub mod status;
