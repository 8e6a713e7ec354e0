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

//! Collaborators the registry consults but does not own.

use std::fmt::Debug;

use locus_cache::endpoint::EndpointRecord;

/// Adjusts the active endpoint list of a servant before it is handed out.
pub trait DynamicWeight: Send + Sync + Debug + 'static {
    /// Post-process the active list of `servant`.
    fn apply(&self, servant: &str, active: Vec<EndpointRecord>) -> Vec<EndpointRecord>;
}

/// Leaves the active list as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticWeight;

impl DynamicWeight for StaticWeight {
    fn apply(&self, _: &str, active: Vec<EndpointRecord>) -> Vec<EndpointRecord> {
        active
    }
}

/// Receives operator-facing error notifications.
///
/// Implementations must not block: the call happens on the reload path.
pub trait Alarm: Send + Sync + Debug + 'static {
    /// Report an error.
    fn notify_error(&self, message: &str);
}

/// Writes notifications to the error log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlarm;

impl Alarm for LogAlarm {
    fn notify_error(&self, message: &str) {
        tracing::error!("[alarm] {message}");
    }
}
