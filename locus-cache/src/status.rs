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

//! Admin/liveness and traffic-flow state per deployed instance.
//!
//! Unlike the snapshot caches these maps take small diffs, so each one sits behind its own short-lived lock. The two
//! maps never lock each other, and no lock is held across a call to the persistent store.

use std::{collections::BTreeMap, fmt::Display};

use hashbrown::HashMap;
use locus_common::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Identifies one deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusKey {
    /// Application.
    pub application: String,
    /// Server name.
    pub server_name: String,
    /// Node the instance is deployed on.
    pub node_name: String,
}

impl StatusKey {
    /// Create a key.
    pub fn new(application: impl Into<String>, server_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            server_name: server_name.into(),
            node_name: node_name.into(),
        }
    }
}

impl Display for StatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}_{}", self.application, self.server_name, self.node_name)
    }
}

/// Active or inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Enabled.
    #[default]
    Active,
    /// Disabled or dead.
    Inactive,
}

impl ServerState {
    /// `Active` iff `active`.
    pub fn from_active(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    /// Whether the state is `Active`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A requested state change of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Instance.
    pub key: StatusKey,
    /// Requested state.
    pub state: ServerState,
    /// Reported process id.
    pub process_id: i32,
}

/// Per-node part of a [`StateGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateUpdate {
    /// Node.
    pub node_name: String,
    /// Requested state.
    pub state: ServerState,
    /// Reported process id.
    pub process_id: i32,
}

/// State changes of one (application, server), persisted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateGroup {
    /// Application.
    pub application: String,
    /// Server name.
    pub server_name: String,
    /// Changes, one per node.
    pub nodes: Vec<NodeStateUpdate>,
}

/// Outcome of [`StatusTracker::sync_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Updates submitted.
    pub submitted: usize,
    /// Updates dropped because the tracked state already matched.
    pub suppressed: usize,
    /// Updates persisted and applied.
    pub written: usize,
    /// Rows the store reported as affected.
    pub affected_rows: usize,
    /// Store writes issued.
    pub writes: usize,
}

/// Per-instance state map.
pub type StateMap = HashMap<StatusKey, ServerState>;

fn merge(map: &mut StateMap, other: StateMap, full: bool) {
    if full {
        *map = other;
    } else {
        map.extend(other);
    }
}

/// Tracks admin/liveness state and flow state per instance.
#[derive(Debug, Default)]
pub struct StatusTracker {
    states: Mutex<StateMap>,
    flow_states: Mutex<StateMap>,
}

impl StatusTracker {
    /// Tracked admin/liveness state.
    pub fn state(&self, key: &StatusKey) -> Option<ServerState> {
        self.states.lock().get(key).copied()
    }

    /// Tracked flow state.
    pub fn flow_state(&self, key: &StatusKey) -> Option<ServerState> {
        self.flow_states.lock().get(key).copied()
    }

    /// Set the admin/liveness state of one instance.
    pub fn set_state(&self, key: StatusKey, state: ServerState) {
        self.states.lock().insert(key, state);
    }

    /// Set the flow state of one instance.
    pub fn set_flow_state(&self, key: StatusKey, state: ServerState) {
        self.flow_states.lock().insert(key, state);
    }

    /// Set the flow state of several nodes of one server.
    pub fn set_flow_states(&self, application: &str, server_name: &str, nodes: &[String], state: ServerState) {
        let mut flow_states = self.flow_states.lock();
        for node in nodes {
            flow_states.insert(StatusKey::new(application, server_name, node.as_str()), state);
        }
    }

    /// Install states from a reload. A full reload replaces the map, an incremental one overwrites per key.
    pub fn replace_states(&self, states: StateMap, full: bool) {
        merge(&mut self.states.lock(), states, full);
    }

    /// Install flow states from a reload. A full reload replaces the map, an incremental one overwrites per key.
    pub fn replace_flow_states(&self, flow_states: StateMap, full: bool) {
        merge(&mut self.flow_states.lock(), flow_states, full);
    }

    /// Count of (active, inactive) tracked admin/liveness states.
    pub fn state_counts(&self) -> (usize, usize) {
        let states = self.states.lock();
        let active = states.values().filter(|s| s.is_active()).count();
        (active, states.len() - active)
    }

    /// Share of tracked instances that are inactive, in `0.0..=1.0`. Zero when nothing is tracked.
    pub fn inactive_ratio(&self) -> f64 {
        let (active, inactive) = self.state_counts();
        match active + inactive {
            0 => 0.0,
            total => inactive as f64 / total as f64,
        }
    }

    /// Count of tracked instances.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Push state changes to the store, skipping those the tracker already holds.
    ///
    /// Updates are processed in chunks of `chunk_size`. For each chunk the surviving updates are grouped by
    /// (application, server) and handed to `writer`. Only after `writer` succeeds are they applied to the tracker.
    /// A failed write stops the sync and leaves that chunk unapplied, so a later sync retries it.
    pub fn sync_batch<F>(&self, updates: &[StateUpdate], chunk_size: usize, mut writer: F) -> Result<SyncReport>
    where
        F: FnMut(&[StateGroup]) -> Result<usize>,
    {
        let mut report = SyncReport {
            submitted: updates.len(),
            ..Default::default()
        };

        for chunk in updates.chunks(chunk_size.max(1)) {
            let groups = {
                let states = self.states.lock();
                let mut pending: BTreeMap<(&str, &str), BTreeMap<&str, &StateUpdate>> = BTreeMap::new();
                for update in chunk {
                    if states.get(&update.key) == Some(&update.state) {
                        report.suppressed += 1;
                        continue;
                    }
                    pending
                        .entry((update.key.application.as_str(), update.key.server_name.as_str()))
                        .or_default()
                        .insert(update.key.node_name.as_str(), update);
                }
                pending
                    .into_iter()
                    .map(|((application, server_name), nodes)| StateGroup {
                        application: application.to_string(),
                        server_name: server_name.to_string(),
                        nodes: nodes
                            .into_values()
                            .map(|update| NodeStateUpdate {
                                node_name: update.key.node_name.clone(),
                                state: update.state,
                                process_id: update.process_id,
                            })
                            .collect(),
                    })
                    .collect::<Vec<_>>()
            };

            if groups.is_empty() {
                tracing::debug!(
                    "[status] chunk of {} updates matches the tracked states, skip writing",
                    chunk.len()
                );
                continue;
            }

            let rows = writer(&groups)?;
            report.writes += 1;
            report.affected_rows += rows;

            let mut states = self.states.lock();
            for group in groups {
                for node in group.nodes {
                    states.insert(
                        StatusKey::new(group.application.as_str(), group.server_name.as_str(), node.node_name),
                        node.state,
                    );
                    report.written += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use locus_common::error::{Error, ErrorKind};

    use super::*;

    fn update(app: &str, server: &str, node: &str, state: ServerState) -> StateUpdate {
        StateUpdate {
            key: StatusKey::new(app, server, node),
            state,
            process_id: 42,
        }
    }

    #[test_log::test]
    fn test_identical_batches_write_once() {
        let tracker = StatusTracker::default();
        let batch = vec![
            update("A", "S", "n1", ServerState::Active),
            update("A", "S", "n2", ServerState::Inactive),
        ];

        let mut calls = 0;
        let report = tracker
            .sync_batch(&batch, 1000, |groups| {
                calls += 1;
                Ok(groups.iter().map(|g| g.nodes.len()).sum())
            })
            .unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.affected_rows, 2);

        let report = tracker
            .sync_batch(&batch, 1000, |_| {
                calls += 1;
                Ok(0)
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(report.suppressed, 2);
        assert_eq!(report.writes, 0);
    }

    #[test]
    fn test_groups_by_application_and_server() {
        let tracker = StatusTracker::default();
        tracker.set_state(StatusKey::new("A", "S", "n3"), ServerState::Active);
        let batch = vec![
            update("B", "T", "n1", ServerState::Active),
            update("A", "S", "n2", ServerState::Inactive),
            update("A", "S", "n1", ServerState::Inactive),
            update("A", "S", "n3", ServerState::Active),
        ];

        let mut seen = vec![];
        tracker
            .sync_batch(&batch, 1000, |groups| {
                seen = groups.to_vec();
                Ok(3)
            })
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].application.as_str(), seen[0].server_name.as_str()), ("A", "S"));
        assert_eq!(
            seen[0].nodes.iter().map(|n| n.node_name.as_str()).collect::<Vec<_>>(),
            vec!["n1", "n2"]
        );
        assert_eq!((seen[1].application.as_str(), seen[1].server_name.as_str()), ("B", "T"));
    }

    #[test]
    fn test_chunking() {
        let tracker = StatusTracker::default();
        let batch = (0..5)
            .map(|i| update("A", "S", &format!("n{i}"), ServerState::Active))
            .collect::<Vec<_>>();

        let mut sizes = vec![];
        let report = tracker
            .sync_batch(&batch, 2, |groups| {
                let n = groups.iter().map(|g| g.nodes.len()).sum::<usize>();
                sizes.push(n);
                Ok(n)
            })
            .unwrap();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(report.writes, 3);
        assert_eq!(tracker.len(), 5);
    }

    #[test]
    fn test_failed_write_leaves_tracker_untouched() {
        let tracker = StatusTracker::default();
        let batch = vec![update("A", "S", "n1", ServerState::Inactive)];

        let err = tracker
            .sync_batch(&batch, 1000, |_| Err(Error::new(ErrorKind::Store, "down")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(tracker.state(&batch[0].key), None);

        // retried naturally by the next sync
        let mut calls = 0;
        tracker
            .sync_batch(&batch, 1000, |_| {
                calls += 1;
                Ok(1)
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(tracker.state(&batch[0].key), Some(ServerState::Inactive));
    }

    #[test]
    fn test_replace_full_and_incremental() {
        let tracker = StatusTracker::default();
        let k1 = StatusKey::new("A", "S", "n1");
        let k2 = StatusKey::new("A", "S", "n2");
        tracker.replace_states(
            StateMap::from_iter([(k1.clone(), ServerState::Active), (k2.clone(), ServerState::Active)]),
            true,
        );

        tracker.replace_states(StateMap::from_iter([(k2.clone(), ServerState::Inactive)]), false);
        assert_eq!(tracker.state_counts(), (1, 1));

        tracker.replace_states(StateMap::from_iter([(k2.clone(), ServerState::Active)]), true);
        assert_eq!(tracker.state(&k1), None);
        assert_eq!(tracker.state(&k2), Some(ServerState::Active));
    }

    #[test]
    fn test_flow_states_independent() {
        let tracker = StatusTracker::default();
        let nodes = vec!["n1".to_string(), "n2".to_string()];
        tracker.set_flow_states("A", "S", &nodes, ServerState::Inactive);

        assert_eq!(
            tracker.flow_state(&StatusKey::new("A", "S", "n2")),
            Some(ServerState::Inactive)
        );
        assert_eq!(tracker.state(&StatusKey::new("A", "S", "n2")), None);
    }
}
