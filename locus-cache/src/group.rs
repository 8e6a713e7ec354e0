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

//! IP-derived group lookup and the station priority table.

use std::{cmp::Reverse, collections::BTreeSet};

use hashbrown::HashMap;

use crate::endpoint::GroupId;

/// Marker replacing the last address component in subnet-level patterns.
pub const IP_WILDCARD: &str = "*";

/// One group rule: the IP patterns and the name that map to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRule {
    /// Group id.
    pub group_id: GroupId,
    /// Rule order. Lower ranks win pattern collisions.
    pub rank: i32,
    /// Exact IPs or `a.b.c.*` subnet patterns.
    pub patterns: Vec<String>,
    /// Group name, may be empty.
    pub name: String,
}

/// Coarsen an address into its subnet-level key: `10.1.2.3` becomes `10.1.2.*`.
pub fn wildcard_key(ip: &str) -> Option<String> {
    let (prefix, last) = ip.rsplit_once('.')?;
    if prefix.is_empty() || last.is_empty() || last == IP_WILDCARD {
        return None;
    }
    Some(format!("{prefix}.{IP_WILDCARD}"))
}

/// Resolves client IPs and group names to group ids.
///
/// Both maps always describe the same generation of rules: the index is rebuilt wholesale, never patched.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    by_ip: HashMap<String, GroupId>,
    by_name: HashMap<String, GroupId>,
}

impl GroupIndex {
    /// Build the index from rules.
    ///
    /// On a pattern or name collision the rule with the lowest rank wins. Among equal ranks the highest group id wins.
    pub fn build<'a>(rules: impl IntoIterator<Item = &'a GroupRule>) -> Self {
        let mut rules = rules.into_iter().collect::<Vec<_>>();
        rules.sort_by_key(|rule| (Reverse(rule.rank), rule.group_id));

        let mut index = Self::default();
        for rule in rules {
            for pattern in rule.patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
                index.by_ip.insert(pattern.to_string(), rule.group_id);
            }
            index.by_name.insert(rule.name.clone(), rule.group_id);
        }
        index
    }

    /// Exact IP match first, then the subnet-level pattern.
    pub fn resolve_by_ip(&self, ip: &str) -> Option<GroupId> {
        if let Some(group) = self.by_ip.get(ip) {
            return Some(*group);
        }
        wildcard_key(ip).and_then(|key| self.by_ip.get(&key).copied())
    }

    /// Exact name match. An empty name never resolves.
    pub fn resolve_by_name(&self, name: &str) -> Option<GroupId> {
        if name.is_empty() {
            return None;
        }
        self.by_name.get(name).copied()
    }

    /// Count of IP patterns.
    pub fn pattern_count(&self) -> usize {
        self.by_ip.len()
    }

    /// Count of group names.
    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}

/// One row of the priority table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPriorityEntry {
    /// Entry id as persisted.
    pub id: String,
    /// Search order, ascending.
    pub rank: i32,
    /// Station label. Not unique.
    pub station: String,
    /// Member groups.
    pub groups: BTreeSet<GroupId>,
}

impl GroupPriorityEntry {
    /// Whether `group` is a member.
    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }
}

/// Split a persisted group list on `|`, `,` or `;`.
///
/// Returns the parsed ids and the tokens that are not integers.
pub fn parse_group_list(text: &str) -> (BTreeSet<GroupId>, Vec<String>) {
    let mut groups = BTreeSet::new();
    let mut invalid = vec![];
    for token in text.split(['|', ',', ';']).map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse() {
            Ok(group) => {
                groups.insert(group);
            }
            Err(_) => invalid.push(token.to_string()),
        }
    }
    (groups, invalid)
}

/// Priority entries strictly ordered by rank.
#[derive(Debug, Clone, Default)]
pub struct GroupPriorityTable {
    entries: Vec<GroupPriorityEntry>,
}

impl GroupPriorityTable {
    /// Build the table. Entries with equal rank keep their input order.
    pub fn build(entries: impl IntoIterator<Item = GroupPriorityEntry>) -> Self {
        let mut entries = entries.into_iter().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.rank);
        Self { entries }
    }

    /// Entries in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &GroupPriorityEntry> {
        self.entries.iter()
    }

    /// First entry in rank order labelled `station`.
    pub fn find_station(&self, station: &str) -> Option<&GroupPriorityEntry> {
        self.entries.iter().find(|entry| entry.station == station)
    }

    /// Count of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
