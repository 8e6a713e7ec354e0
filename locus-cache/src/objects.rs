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

use hashbrown::{HashMap, HashSet};

use crate::endpoint::{EndpointRecord, Transport};

type AddressKey = (String, u16, Transport);

fn address_key(endpoint: &EndpointRecord) -> AddressKey {
    (endpoint.host.clone(), endpoint.port, endpoint.transport)
}

/// Active and inactive endpoints of one servant.
///
/// The two lists partition every known endpoint of the servant: an address is never present twice.
#[derive(Debug, Clone, Default)]
pub struct ObjectsCacheEntry {
    active: Vec<EndpointRecord>,
    inactive: Vec<EndpointRecord>,
    addresses: HashSet<AddressKey>,
}

impl PartialEq for ObjectsCacheEntry {
    fn eq(&self, other: &Self) -> bool {
        self.active == other.active && self.inactive == other.inactive
    }
}

impl Eq for ObjectsCacheEntry {}

impl ObjectsCacheEntry {
    /// Insert an endpoint into the active or the inactive list.
    ///
    /// Returns `false` if the endpoint was dropped, either because it is a backup or because its address is already
    /// listed.
    pub fn insert(&mut self, endpoint: EndpointRecord, active: bool) -> bool {
        if endpoint.backup {
            return false;
        }
        if !self.addresses.insert(address_key(&endpoint)) {
            return false;
        }
        if active {
            self.active.push(endpoint);
        } else {
            self.inactive.push(endpoint);
        }
        true
    }

    /// Active endpoints in load order.
    pub fn active(&self) -> &[EndpointRecord] {
        &self.active
    }

    /// Inactive endpoints in load order.
    pub fn inactive(&self) -> &[EndpointRecord] {
        &self.inactive
    }

    /// Count of endpoints in both lists.
    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }

    /// Whether both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty()
    }
}

/// Per-servant endpoint lists, the primary answer source for lookups.
#[derive(Debug, Clone, Default)]
pub struct ObjectsCache {
    entries: HashMap<String, ObjectsCacheEntry>,
}

impl ObjectsCache {
    /// Get the entry of a servant.
    pub fn get(&self, servant: &str) -> Option<&ObjectsCacheEntry> {
        self.entries.get(servant)
    }

    /// Get or create the entry of a servant.
    pub fn entry_mut(&mut self, servant: &str) -> &mut ObjectsCacheEntry {
        self.entries.entry_ref(servant).or_default()
    }

    /// Whether a servant is known.
    pub fn contains(&self, servant: &str) -> bool {
        self.entries.contains_key(servant)
    }

    /// Replace every servant present in `other` wholesale. Servants absent from `other` are untouched.
    pub fn replace_servants(&mut self, other: ObjectsCache) {
        for (servant, entry) in other.entries {
            self.entries.insert(servant, entry);
        }
    }

    /// Drop servants whose entries hold no endpoint. Returns how many were dropped.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_empty());
        before - self.entries.len()
    }

    /// Iterate servants and their entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectsCacheEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Count of servants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no servant is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of endpoints over all servants.
    pub fn endpoint_count(&self) -> usize {
        self.entries.values().map(ObjectsCacheEntry::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointAddress;

    fn endpoint(host: &str, port: u16) -> EndpointRecord {
        let address: EndpointAddress = format!("tcp -h {host} -p {port}").parse().unwrap();
        EndpointRecord::new(address)
    }

    #[test]
    fn test_entry_partition() {
        let mut entry = ObjectsCacheEntry::default();
        assert!(entry.insert(endpoint("10.0.0.1", 1), true));
        assert!(entry.insert(endpoint("10.0.0.2", 1), false));
        // same address in the other list is refused
        assert!(!entry.insert(endpoint("10.0.0.1", 1), false));
        assert!(!entry.insert(endpoint("10.0.0.3", 1).with_backup(true), true));

        assert_eq!(entry.active().len(), 1);
        assert_eq!(entry.inactive().len(), 1);
        for active in entry.active() {
            assert!(!entry.inactive().iter().any(|e| e.host == active.host));
        }
    }

    #[test]
    fn test_replace_servants() {
        let mut cache = ObjectsCache::default();
        cache.entry_mut("A.B.Obj").insert(endpoint("10.0.0.1", 1), true);
        cache.entry_mut("A.B.Obj").insert(endpoint("10.0.0.2", 1), true);
        cache.entry_mut("A.C.Obj").insert(endpoint("10.0.0.3", 1), true);

        let mut delta = ObjectsCache::default();
        delta.entry_mut("A.B.Obj").insert(endpoint("10.0.0.2", 1), false);
        cache.replace_servants(delta);

        let entry = cache.get("A.B.Obj").unwrap();
        assert!(entry.active().is_empty());
        assert_eq!(entry.inactive(), &[endpoint("10.0.0.2", 1)]);
        assert_eq!(cache.get("A.C.Obj").unwrap().len(), 1);
        assert_eq!(cache.endpoint_count(), 2);
    }

    #[test]
    fn test_prune_empty() {
        let mut cache = ObjectsCache::default();
        cache.entry_mut("A.B.Obj").insert(endpoint("10.0.0.1", 1), true);
        cache.entry_mut("A.C.Obj").insert(endpoint("10.0.0.2", 1).with_backup(true), true);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.prune_empty(), 1);
        assert!(cache.contains("A.B.Obj"));
        assert!(!cache.contains("A.C.Obj"));
    }

    #[test]
    fn test_same_host_other_port_or_transport() {
        let mut entry = ObjectsCacheEntry::default();
        assert!(entry.insert(endpoint("10.0.0.1", 1), true));
        assert!(entry.insert(endpoint("10.0.0.1", 2), true));

        let address: EndpointAddress = "udp -h 10.0.0.1 -p 1".parse().unwrap();
        assert!(entry.insert(EndpointRecord::new(address), false));
        assert!(!entry.insert(endpoint("10.0.0.1", 2), false));
        assert_eq!(entry.len(), 3);
    }
}
