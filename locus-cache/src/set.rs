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

//! Set partition index.
//!
//! A set is a named deployment partition `name.area.group`. The index keeps, per servant and set name, every
//! endpoint that declared a valid set membership.

use std::{fmt::Display, str::FromStr};

use hashbrown::HashMap;
use locus_common::error::{Error, Result};

use crate::endpoint::EndpointRecord;

/// Wildcard marker. Allowed in the group position only.
pub const SET_WILDCARD: &str = "*";

/// A `name.area.group` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetDivision {
    /// Set name.
    pub name: String,
    /// Area within the set.
    pub area: String,
    /// Group within the area, or `*`.
    pub group: String,
}

impl SetDivision {
    /// Create a division from its three parts.
    pub fn new(name: impl Into<String>, area: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            area: area.into(),
            group: group.into(),
        }
    }

    /// Whether an endpoint declaring this division actually takes part in sets.
    ///
    /// All parts must be non-empty, and neither name nor area may be a wildcard.
    pub fn is_valid_membership(&self) -> bool {
        !self.name.is_empty()
            && !self.area.is_empty()
            && !self.group.is_empty()
            && self.name != SET_WILDCARD
            && self.area != SET_WILDCARD
    }

    /// Whether the group position is the wildcard.
    pub fn is_wildcard_group(&self) -> bool {
        self.group == SET_WILDCARD
    }

    /// `name.area`.
    pub fn set_area(&self) -> String {
        format!("{}.{}", self.name, self.area)
    }

    /// `name.area.group`.
    pub fn set_id(&self) -> String {
        format!("{}.{}.{}", self.name, self.area, self.group)
    }

    /// `name.area.*`.
    pub fn wildcard_set_id(&self) -> String {
        format!("{}.{}.{}", self.name, self.area, SET_WILDCARD)
    }
}

impl FromStr for SetDivision {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut parts = text.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(area), Some(group)) if !name.is_empty() && !area.is_empty() && !group.is_empty() => {
                Ok(Self::new(name, area, group))
            }
            _ => Err(Error::parse("set", text, "set division must be name.area.group")),
        }
    }
}

impl Display for SetDivision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.area, self.group)
    }
}

/// An endpoint together with its set membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetServerInfo {
    /// `name.area.group`.
    pub set_id: String,
    /// `name.area`.
    pub set_area: String,
    /// Whether the endpoint is in its servant's active list.
    pub active: bool,
    /// The endpoint.
    pub endpoint: EndpointRecord,
}

impl SetServerInfo {
    /// Create the membership record of `endpoint` in `division`.
    pub fn new(division: &SetDivision, active: bool, endpoint: EndpointRecord) -> Self {
        Self {
            set_id: division.set_id(),
            set_area: division.set_area(),
            active,
            endpoint,
        }
    }
}

/// Split the members accepted by `accept` into active and inactive endpoints.
pub fn partition_members<'a>(
    members: impl IntoIterator<Item = &'a SetServerInfo>,
    accept: impl Fn(&SetServerInfo) -> bool,
) -> (Vec<EndpointRecord>, Vec<EndpointRecord>) {
    let mut active = vec![];
    let mut inactive = vec![];
    for info in members.into_iter().filter(|info| accept(info)) {
        if info.active {
            active.push(info.endpoint.clone());
        } else {
            inactive.push(info.endpoint.clone());
        }
    }
    (active, inactive)
}

/// Members of one servant, keyed by set name.
pub type ServantSets = HashMap<String, Vec<SetServerInfo>>;

/// Set members keyed by servant then by set name.
#[derive(Debug, Clone, Default)]
pub struct SetDivisionIndex {
    entries: HashMap<String, ServantSets>,
}

impl SetDivisionIndex {
    /// Record a member.
    pub fn insert(&mut self, servant: &str, set_name: &str, info: SetServerInfo) {
        self.entries
            .entry_ref(servant)
            .or_default()
            .entry_ref(set_name)
            .or_default()
            .push(info);
    }

    /// Members of `servant` in set `set_name`.
    pub fn members(&self, servant: &str, set_name: &str) -> Option<&[SetServerInfo]> {
        self.entries
            .get(servant)
            .and_then(|sets| sets.get(set_name))
            .map(Vec::as_slice)
    }

    /// Replace the members of `servant` wholesale. An empty map removes the servant.
    pub fn replace_servant(&mut self, servant: &str, sets: ServantSets) {
        if sets.is_empty() {
            self.entries.remove(servant);
        } else {
            self.entries.insert(servant.to_string(), sets);
        }
    }

    /// Count of servants with set members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no servant has set members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
