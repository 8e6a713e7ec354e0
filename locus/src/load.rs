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

//! Turns store rows into cache contents.
//!
//! Everything here is pure: the refresher fetches the rows, calls into this module, and decides what to publish.

use hashbrown::HashMap;
use itertools::Itertools;
use locus_cache::{
    endpoint::{EndpointAddress, EndpointRecord, GroupId},
    group::{parse_group_list, GroupIndex, GroupPriorityEntry, GroupPriorityTable, GroupRule},
    objects::ObjectsCache,
    set::{ServantSets, SetDivision, SetDivisionIndex, SetServerInfo},
    status::{ServerState, StateMap},
};

use crate::store::{GroupPriorityRow, GroupRuleRow, RegistryRow, ServerRow};

/// Build the group index from rule rows.
pub fn build_group_index(rows: &[GroupRuleRow]) -> GroupIndex {
    let rules = rows
        .iter()
        .map(|row| GroupRule {
            group_id: row.group_id,
            rank: row.rank,
            patterns: row.allow_ip_rule.split('|').map(str::to_string).collect(),
            name: row.group_name.clone(),
        })
        .collect_vec();
    let index = GroupIndex::build(&rules);
    tracing::debug!(
        "[load] group index built, rules: {}, patterns: {}, names: {}",
        rules.len(),
        index.pattern_count(),
        index.name_count()
    );
    index
}

/// Build the priority table from priority rows. Group ids that are not integers are skipped.
pub fn build_priority_table(rows: &[GroupPriorityRow]) -> GroupPriorityTable {
    GroupPriorityTable::build(rows.iter().map(|row| {
        let (groups, invalid) = parse_group_list(&row.group_list);
        if !invalid.is_empty() {
            tracing::warn!(
                "[load] priority entry {} has invalid group ids: {}",
                row.id,
                invalid.iter().join(",")
            );
        }
        GroupPriorityEntry {
            id: row.id.clone(),
            rank: row.rank,
            station: row.station.clone(),
            groups,
        }
    }))
}

/// Servant-level output of one load.
#[derive(Debug, Default)]
pub struct LoadedServants {
    /// Endpoint lists of every servant seen in the rows.
    pub objects: ObjectsCache,
    /// Set members of every servant seen in the rows. Servants without members map to an empty entry.
    pub sets: HashMap<String, ServantSets>,
    /// Admin/liveness state per instance.
    pub states: StateMap,
    /// Flow state per instance.
    pub flow_states: StateMap,
    /// Rows skipped as malformed.
    pub skipped: usize,
}

impl LoadedServants {
    /// Install the set members into `index`, replacing every servant seen and dropping those left without members.
    pub fn apply_sets(&mut self, index: &mut SetDivisionIndex) {
        for (servant, sets) in self.sets.drain() {
            index.replace_servant(&servant, sets);
        }
    }
}

struct Adapter<'a> {
    servant: &'a str,
    endpoint: &'a str,
    enable_group: bool,
    ip_group_name: &'a str,
    backup: bool,
    active: bool,
    set: Option<SetDivision>,
}

/// Classifies rows into caches, resolving groups against one index.
pub struct ServantLoader<'a> {
    groups: &'a GroupIndex,
    loaded: LoadedServants,
}

impl<'a> ServantLoader<'a> {
    /// Create a loader resolving groups against `groups`.
    pub fn new(groups: &'a GroupIndex) -> Self {
        Self {
            groups,
            loaded: LoadedServants::default(),
        }
    }

    /// Classify server rows.
    pub fn load_servers(mut self, rows: &[ServerRow]) -> Self {
        for row in rows {
            self.load_server(row);
        }
        self
    }

    /// Classify self-registration rows. They feed endpoint lists only.
    pub fn load_registrations(mut self, rows: &[RegistryRow]) -> Self {
        for row in rows {
            self.load_adapter(Adapter {
                servant: &row.servant,
                endpoint: &row.endpoint,
                enable_group: row.enable_group,
                ip_group_name: "",
                backup: false,
                active: row.present_state.is_active(),
                set: None,
            });
        }
        self
    }

    /// Finish loading.
    pub fn finish(self) -> LoadedServants {
        self.loaded
    }

    fn load_server(&mut self, row: &ServerRow) {
        let key = row.status_key();

        if !row.has_adapter() {
            tracing::debug!("[load] {key} has no adapter");
            let active = row.setting_state.is_active() && row.present_state.is_active();
            self.loaded.states.insert(key, ServerState::from_active(active));
            return;
        }

        let active = row.setting_state.is_active()
            && row.present_state.is_active()
            && row.flow_state != ServerState::Inactive;

        let set = if row.enable_set {
            let division = SetDivision::new(row.set_name.as_str(), row.set_area.as_str(), row.set_group.as_str());
            if division.is_valid_membership() {
                Some(division)
            } else {
                tracing::warn!("[load] {} on {key} has invalid set division {division}", row.servant);
                None
            }
        } else {
            None
        };

        let loaded = self.load_adapter(Adapter {
            servant: &row.servant,
            endpoint: &row.endpoint,
            enable_group: row.enable_group,
            ip_group_name: row.ip_group_name.trim(),
            backup: row.backup,
            active,
            set,
        });

        if loaded {
            self.loaded.states.insert(key.clone(), ServerState::from_active(active));
            self.loaded.flow_states.insert(key, row.flow_state);
        }
    }

    /// Returns whether the adapter produced a listed endpoint.
    fn load_adapter(&mut self, adapter: Adapter<'_>) -> bool {
        let address = match adapter.endpoint.parse::<EndpointAddress>() {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!("[load] skip malformed endpoint of {}: {e}", adapter.servant);
                self.loaded.skipped += 1;
                return false;
            }
        };

        let real_group = self.resolve_group(&address.host, adapter.ip_group_name);
        if adapter.enable_group && real_group.is_none() {
            tracing::debug!(
                "[load] no group for {}, group name: {:?}, host: {}",
                adapter.servant,
                adapter.ip_group_name,
                address.host
            );
        }

        let endpoint = EndpointRecord::new(address)
            .with_group(real_group, adapter.enable_group)
            .with_set_id(adapter.set.as_ref().map(SetDivision::set_id))
            .with_backup(adapter.backup);

        // A servant seen in this load is replaced wholesale, even when none of its endpoints survive.
        let servant_sets = self.loaded.sets.entry_ref(adapter.servant).or_default();
        let entry = self.loaded.objects.entry_mut(adapter.servant);

        if endpoint.backup {
            tracing::debug!("[load] drop backup endpoint {endpoint} of {}", adapter.servant);
            return false;
        }

        tracing::debug!(
            "[load] {} {endpoint}, real group: {:?}, work group: {:?}, active: {}",
            adapter.servant,
            endpoint.real_group,
            endpoint.work_group,
            adapter.active
        );

        let member = adapter
            .set
            .as_ref()
            .map(|division| SetServerInfo::new(division, adapter.active, endpoint.clone()));
        if !entry.insert(endpoint, adapter.active) {
            tracing::debug!("[load] drop repeated endpoint {:?} of {}", adapter.endpoint, adapter.servant);
            return false;
        }
        if let (Some(division), Some(member)) = (&adapter.set, member) {
            servant_sets.entry_ref(division.name.as_str()).or_default().push(member);
        }
        true
    }

    fn resolve_group(&self, host: &str, group_name: &str) -> Option<GroupId> {
        if group_name.is_empty() {
            self.groups.resolve_by_ip(host)
        } else {
            self.groups.resolve_by_name(group_name)
        }
    }
}
