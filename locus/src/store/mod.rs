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

//! Contract of the persistent store backing the registry.
//!
//! Every call is blocking and fallible. Async callers go through `spawn_blocking`.

/// In-memory store.
pub mod memory;

use std::{fmt::Debug, time::SystemTime};

use locus_cache::{
    endpoint::GroupId,
    status::{ServerState, StateGroup, StatusKey},
};
use locus_common::error::Result;
use serde::{Deserialize, Serialize};

/// Node-level liveness row, the input of recover protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    /// Node name.
    pub node_name: String,
    /// Whether the node agent is alive.
    pub present_state: ServerState,
}

/// One server row joined with one of its adapters.
///
/// A server without adapters yields a single row with empty `servant` and `endpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRow {
    /// Application.
    pub application: String,
    /// Server name.
    pub server_name: String,
    /// Node name.
    pub node_name: String,
    /// Servant id served by the adapter.
    pub servant: String,
    /// Endpoint text of the adapter.
    pub endpoint: String,
    /// Whether callers should be routed by group.
    pub enable_group: bool,
    /// Admin state.
    pub setting_state: ServerState,
    /// Liveness state.
    pub present_state: ServerState,
    /// Traffic flow state.
    pub flow_state: ServerState,
    /// Whether the server takes part in sets.
    pub enable_set: bool,
    /// Set name.
    pub set_name: String,
    /// Set area.
    pub set_area: String,
    /// Set group.
    pub set_group: String,
    /// Group name overriding the IP-derived group.
    pub ip_group_name: String,
    /// Backup servers are never handed out.
    pub backup: bool,
    /// Last reported process id.
    pub process_id: i32,
    /// Change timestamp, seconds since the unix epoch.
    pub updated_at: u64,
}

impl ServerRow {
    /// Key of the deployed instance the row belongs to.
    pub fn status_key(&self) -> StatusKey {
        StatusKey::new(
            self.application.as_str(),
            self.server_name.as_str(),
            self.node_name.as_str(),
        )
    }

    /// Whether the row carries an adapter.
    pub fn has_adapter(&self) -> bool {
        !self.servant.is_empty() || !self.endpoint.is_empty()
    }
}

/// Group rule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRuleRow {
    /// Group id.
    pub group_id: GroupId,
    /// Rule order.
    #[serde(default)]
    pub rank: i32,
    /// `|`-separated IPs and `a.b.c.*` patterns.
    pub allow_ip_rule: String,
    /// Group name.
    #[serde(default)]
    pub group_name: String,
}

/// Group priority row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPriorityRow {
    /// Entry id.
    pub id: String,
    /// Search order.
    pub rank: i32,
    /// Station label.
    #[serde(default)]
    pub station: String,
    /// Group ids separated by `|`, `,` or `;`.
    pub group_list: String,
}

/// Self-registration row: one servant the registry serves itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRow {
    /// `host:port` of the registry instance.
    pub locator_id: String,
    /// Servant id.
    pub servant: String,
    /// Endpoint text.
    pub endpoint: String,
    /// Whether callers should be routed by group.
    #[serde(default)]
    pub enable_group: bool,
    /// Liveness of the registry instance.
    pub present_state: ServerState,
    /// Reported version.
    #[serde(default)]
    pub version: String,
}

/// State column written by [`RegistryStore::write_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// Admin state.
    SettingState,
    /// Liveness state, written together with the process id.
    PresentState,
}

impl StateField {
    /// Column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::SettingState => "setting_state",
            StateField::PresentState => "present_state",
        }
    }
}

/// Persistent store of the registry.
///
/// Reads return rows in store order. Writes return the count of affected rows.
pub trait RegistryStore: Send + Sync + Debug + 'static {
    /// All node rows.
    fn query_nodes(&self) -> Result<Vec<NodeRow>>;

    /// Server rows joined with their adapters.
    ///
    /// With `since`, only servers with a server or adapter row changed at or after `since` are returned, and for those
    /// every row is returned.
    fn query_servers(&self, since: Option<SystemTime>) -> Result<Vec<ServerRow>>;

    /// All group rules.
    fn query_group_rules(&self) -> Result<Vec<GroupRuleRow>>;

    /// All group priority rows.
    fn query_group_priority(&self) -> Result<Vec<GroupPriorityRow>>;

    /// Servants registered by registry instances.
    fn query_self_registrations(&self) -> Result<Vec<RegistryRow>>;

    /// Write liveness states, grouped by (application, server).
    fn write_state_batch(&self, groups: &[StateGroup]) -> Result<usize>;

    /// Write one state column of one instance.
    fn write_state(&self, key: &StatusKey, field: StateField, state: ServerState, process_id: i32) -> Result<usize>;

    /// Write the flow state of several nodes of one server.
    fn write_flow_state(&self, application: &str, server_name: &str, nodes: &[String], state: ServerState)
        -> Result<usize>;

    /// Upsert the servants of one registry instance.
    fn write_heartbeat(&self, locator_id: &str, servants: &[(String, String)], version: &str) -> Result<usize>;
}
