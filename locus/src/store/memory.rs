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

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use hashbrown::{HashMap, HashSet};
use locus_cache::status::{ServerState, StateGroup, StatusKey};
use locus_common::error::{Error, ErrorKind, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{GroupPriorityRow, GroupRuleRow, NodeRow, RegistryRow, RegistryStore, ServerRow, StateField};

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Tables held by a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTables {
    /// Node rows.
    pub nodes: Vec<NodeRow>,
    /// Server rows.
    pub servers: Vec<ServerRow>,
    /// Group rule rows.
    pub group_rules: Vec<GroupRuleRow>,
    /// Group priority rows.
    pub group_priority: Vec<GroupPriorityRow>,
    /// Self-registration rows.
    pub registrations: Vec<RegistryRow>,
}

/// [`RegistryStore`] over in-memory tables.
///
/// Calls can be made to fail by name, and every call is counted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemoryStore {
    /// Create a store over `tables`.
    pub fn new(tables: MemoryTables) -> Self {
        Self {
            tables: RwLock::new(tables),
            ..Default::default()
        }
    }

    /// Load the tables from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let tables = serde_json::from_str(text)
            .map_err(|e| Error::new(ErrorKind::Parse, "invalid store tables").with_source(e))?;
        Ok(Self::new(tables))
    }

    /// Load the tables from a JSON file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorKind::Parse, "cannot read store tables")
                .with_context("path", path.display())
                .with_source(e)
        })?;
        Self::from_json(&text)
    }

    /// Copy the current tables.
    pub fn tables(&self) -> MemoryTables {
        self.tables.read().clone()
    }

    /// Modify the tables in place.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut MemoryTables) -> R,
    {
        f(&mut self.tables.write())
    }

    /// Make every later call named `call` fail with a store error.
    pub fn fail(&self, call: &'static str) {
        self.failing.lock().insert(call);
    }

    /// Undo [`MemoryStore::fail`].
    pub fn recover(&self, call: &'static str) {
        self.failing.lock().remove(call);
    }

    /// Count of calls named `call` so far, failed ones included.
    pub fn calls(&self, call: &str) -> usize {
        self.calls.lock().get(call).copied().unwrap_or_default()
    }

    fn enter(&self, call: &'static str) -> Result<()> {
        *self.calls.lock().entry(call).or_default() += 1;
        if self.failing.lock().contains(call) {
            return Err(Error::store(call, anyhow::anyhow!("injected failure")));
        }
        Ok(())
    }
}

impl RegistryStore for MemoryStore {
    fn query_nodes(&self) -> Result<Vec<NodeRow>> {
        self.enter("query_nodes")?;
        Ok(self.tables.read().nodes.clone())
    }

    fn query_servers(&self, since: Option<SystemTime>) -> Result<Vec<ServerRow>> {
        self.enter("query_servers")?;
        let tables = self.tables.read();
        let Some(since) = since else {
            return Ok(tables.servers.clone());
        };
        let since = unix_secs(since);
        let touched = tables
            .servers
            .iter()
            .filter(|row| row.updated_at >= since)
            .map(|row| (row.application.as_str(), row.server_name.as_str()))
            .collect::<HashSet<_>>();
        Ok(tables
            .servers
            .iter()
            .filter(|row| touched.contains(&(row.application.as_str(), row.server_name.as_str())))
            .cloned()
            .collect())
    }

    fn query_group_rules(&self) -> Result<Vec<GroupRuleRow>> {
        self.enter("query_group_rules")?;
        Ok(self.tables.read().group_rules.clone())
    }

    fn query_group_priority(&self) -> Result<Vec<GroupPriorityRow>> {
        self.enter("query_group_priority")?;
        Ok(self.tables.read().group_priority.clone())
    }

    fn query_self_registrations(&self) -> Result<Vec<RegistryRow>> {
        self.enter("query_self_registrations")?;
        Ok(self.tables.read().registrations.clone())
    }

    fn write_state_batch(&self, groups: &[StateGroup]) -> Result<usize> {
        self.enter("write_state_batch")?;
        let now = unix_secs(SystemTime::now());
        let mut tables = self.tables.write();
        let mut affected = 0;
        for group in groups {
            for node in &group.nodes {
                for row in tables.servers.iter_mut().filter(|row| {
                    row.application == group.application
                        && row.server_name == group.server_name
                        && row.node_name == node.node_name
                }) {
                    row.present_state = node.state;
                    row.process_id = node.process_id;
                    row.updated_at = now;
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    fn write_state(&self, key: &StatusKey, field: StateField, state: ServerState, process_id: i32) -> Result<usize> {
        self.enter("write_state")?;
        let now = unix_secs(SystemTime::now());
        let mut tables = self.tables.write();
        let mut affected = 0;
        for row in tables.servers.iter_mut().filter(|row| {
            row.application == key.application && row.server_name == key.server_name && row.node_name == key.node_name
        }) {
            match field {
                StateField::SettingState => row.setting_state = state,
                StateField::PresentState => {
                    row.present_state = state;
                    row.process_id = process_id;
                }
            }
            row.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    fn write_flow_state(
        &self,
        application: &str,
        server_name: &str,
        nodes: &[String],
        state: ServerState,
    ) -> Result<usize> {
        self.enter("write_flow_state")?;
        let now = unix_secs(SystemTime::now());
        let mut tables = self.tables.write();
        let mut affected = 0;
        for row in tables.servers.iter_mut().filter(|row| {
            row.application == application && row.server_name == server_name && nodes.contains(&row.node_name)
        }) {
            row.flow_state = state;
            row.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    fn write_heartbeat(&self, locator_id: &str, servants: &[(String, String)], version: &str) -> Result<usize> {
        self.enter("write_heartbeat")?;
        let mut tables = self.tables.write();
        for (servant, endpoint) in servants {
            let row = RegistryRow {
                locator_id: locator_id.to_string(),
                servant: servant.clone(),
                endpoint: endpoint.clone(),
                enable_group: false,
                present_state: ServerState::Active,
                version: version.to_string(),
            };
            match tables
                .registrations
                .iter_mut()
                .find(|r| r.locator_id == locator_id && r.servant == *servant)
            {
                Some(existing) => {
                    existing.endpoint = row.endpoint;
                    existing.present_state = row.present_state;
                    existing.version = row.version;
                }
                None => tables.registrations.push(row),
            }
        }
        Ok(servants.len())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    fn server(application: &str, server_name: &str, node: &str, updated_at: u64) -> ServerRow {
        ServerRow {
            application: application.to_string(),
            server_name: server_name.to_string(),
            node_name: node.to_string(),
            servant: format!("{application}.{server_name}.Obj"),
            endpoint: "tcp -h 10.0.0.1 -p 1000".to_string(),
            updated_at,
            ..Default::default()
        }
    }

    #[test]
    fn test_incremental_query_returns_whole_servers() {
        let now = unix_secs(SystemTime::now());
        let store = MemoryStore::new(MemoryTables {
            servers: vec![
                server("A", "S", "n1", now),
                server("A", "S", "n2", 0),
                server("B", "T", "n1", 0),
            ],
            ..Default::default()
        });

        let rows = store
            .query_servers(Some(SystemTime::now() - Duration::from_secs(60)))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.application == "A"));
        assert_eq!(store.query_servers(None).unwrap().len(), 3);
        assert_eq!(store.calls("query_servers"), 2);
    }

    #[test]
    fn test_failure_injection() {
        let store = MemoryStore::default();
        store.fail("query_nodes");
        let err = store.query_nodes().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        store.recover("query_nodes");
        assert!(store.query_nodes().unwrap().is_empty());
        assert_eq!(store.calls("query_nodes"), 2);
    }

    #[test]
    fn test_writes() {
        let store = MemoryStore::new(MemoryTables {
            servers: vec![server("A", "S", "n1", 0), server("A", "S", "n2", 0)],
            ..Default::default()
        });

        let affected = store
            .write_state(
                &StatusKey::new("A", "S", "n1"),
                StateField::PresentState,
                ServerState::Inactive,
                7,
            )
            .unwrap();
        assert_eq!(affected, 1);
        let affected = store
            .write_flow_state("A", "S", &["n1".to_string(), "n2".to_string()], ServerState::Inactive)
            .unwrap();
        assert_eq!(affected, 2);

        let tables = store.tables();
        assert_eq!(tables.servers[0].present_state, ServerState::Inactive);
        assert_eq!(tables.servers[0].process_id, 7);
        assert_eq!(tables.servers[1].present_state, ServerState::Active);
        assert!(tables.servers.iter().all(|row| row.flow_state == ServerState::Inactive));

        let servants = vec![("locus.Registry.QueryObj".to_string(), "tcp -h 10.0.0.9 -p 17890".to_string())];
        store.write_heartbeat("10.0.0.9:17890", &servants, "1.0").unwrap();
        store.write_heartbeat("10.0.0.9:17890", &servants, "1.1").unwrap();
        let tables = store.tables();
        assert_eq!(tables.registrations.len(), 1);
        assert_eq!(tables.registrations[0].version, "1.1");
    }

    #[test]
    fn test_open_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "nodes": [{{ "node_name": "n1", "present_state": "active" }}],
                "group_rules": [{{ "group_id": 1, "allow_ip_rule": "10.0.0.*" }}]
            }}"#
        )
        .unwrap();

        let store = MemoryStore::open(file.path()).unwrap();
        assert_eq!(store.query_nodes().unwrap().len(), 1);
        assert_eq!(store.query_group_rules().unwrap()[0].group_name, "");

        let err = MemoryStore::from_json("{ not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        let err = MemoryStore::from_json(r#"{ "nodes": 1 }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
