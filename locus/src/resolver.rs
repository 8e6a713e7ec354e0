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

//! Endpoint lookup strategies over the published snapshot.

use std::{collections::BTreeSet, sync::Arc};

use locus_cache::{
    endpoint::{EndpointRecord, GroupId, WeightPolicy},
    objects::ObjectsCacheEntry,
    set::{partition_members, SetDivision, SetServerInfo},
    snapshot::RegistrySnapshot,
};
use locus_common::snapshot::SnapshotCache;
use thiserror::Error;

use crate::{
    collaborator::DynamicWeight,
    metrics::{Metrics, Strategy},
};

/// Expected lookup miss. Cheap to produce, never worth more than a debug log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    /// The servant is not registered.
    #[error("servant {0} not found")]
    Servant(String),
    /// No priority entry carries the station label.
    #[error("station {0} not found")]
    Station(String),
    /// The servant does not take part in the requested set partition.
    #[error("servant {servant} does not take part in set {set}")]
    SetPartition {
        /// Servant id.
        servant: String,
        /// Requested `name.area.group`.
        set: String,
    },
}

/// Active and inactive endpoints returned by a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Endpoints callers should use.
    pub active: Vec<EndpointRecord>,
    /// Known endpoints currently out of service.
    pub inactive: Vec<EndpointRecord>,
}

impl Resolution {
    fn from_entry(entry: &ObjectsCacheEntry) -> Self {
        Self {
            active: entry.active().to_vec(),
            inactive: entry.inactive().to_vec(),
        }
    }
}

/// Which group of an endpoint a filter compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupField {
    Work,
    Real,
}

/// What the compared group must match.
#[derive(Debug, Clone, Copy)]
enum GroupTarget<'a> {
    /// Equal to the group. `None` selects ungrouped endpoints.
    One(Option<GroupId>),
    /// Member of the set.
    Any(&'a BTreeSet<GroupId>),
}

fn filter_by_group(entry: &ObjectsCacheEntry, field: GroupField, target: GroupTarget<'_>) -> Resolution {
    let keep = |endpoint: &&EndpointRecord| {
        let group = match field {
            GroupField::Work => endpoint.work_group,
            GroupField::Real => endpoint.real_group,
        };
        match target {
            GroupTarget::One(target) => group == target,
            GroupTarget::Any(targets) => group.is_some_and(|g| targets.contains(&g)),
        }
    };
    Resolution {
        active: entry.active().iter().filter(keep).cloned().collect(),
        inactive: entry.inactive().iter().filter(keep).cloned().collect(),
    }
}

fn collect_members(members: &[SetServerInfo], accept: impl Fn(&SetServerInfo) -> bool) -> Resolution {
    let (active, inactive) = partition_members(members, accept);
    Resolution { active, inactive }
}

/// Resolves servants to endpoints.
///
/// Every lookup reads one published snapshot, so it never observes a half-applied reload.
#[derive(Debug, Clone)]
pub struct Resolver {
    snapshot: Arc<SnapshotCache<RegistrySnapshot>>,
    weight: Arc<dyn DynamicWeight>,
    metrics: Arc<Metrics>,
}

impl Resolver {
    /// Create a resolver over `snapshot`.
    pub fn new(
        snapshot: Arc<SnapshotCache<RegistrySnapshot>>,
        weight: Arc<dyn DynamicWeight>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            snapshot,
            weight,
            metrics,
        }
    }

    /// Every active and inactive endpoint of the servant.
    pub fn resolve_plain(&self, servant: &str) -> Result<Resolution, NotFound> {
        self.metrics.record_lookup(Strategy::Plain);
        let snapshot = self.snapshot.read();
        let entry = self.entry(&snapshot, servant)?;
        Ok(self.finish(servant, Resolution::from_entry(entry)))
    }

    /// Active endpoints of the servant only.
    pub fn resolve_active(&self, servant: &str) -> Result<Vec<EndpointRecord>, NotFound> {
        self.resolve_plain(servant).map(|resolution| resolution.active)
    }

    /// Endpoints in the caller's group, falling back to ungrouped endpoints and then to everything.
    ///
    /// A caller whose IP maps to no group gets the plain answer.
    pub fn resolve_by_group(&self, servant: &str, client_ip: &str) -> Result<Resolution, NotFound> {
        self.metrics.record_lookup(Strategy::Group);
        let snapshot = self.snapshot.read();
        let Some(group) = snapshot.groups.resolve_by_ip(client_ip) else {
            tracing::debug!("[resolver] no group for {client_ip}, resolve {servant} plainly");
            let entry = self.entry(&snapshot, servant)?;
            return Ok(self.finish(servant, Resolution::from_entry(entry)));
        };
        let entry = self.entry(&snapshot, servant)?;

        let mut resolution = filter_by_group(entry, GroupField::Work, GroupTarget::One(Some(group)));
        if resolution.active.is_empty() {
            resolution = filter_by_group(entry, GroupField::Work, GroupTarget::One(None));
        }
        if resolution.active.is_empty() {
            resolution = Resolution::from_entry(entry);
        }
        Ok(self.finish(servant, resolution))
    }

    /// Like [`Resolver::resolve_by_group`], but consults the priority table before falling back to ungrouped
    /// endpoints.
    ///
    /// Priority entries containing the caller's group are tried in rank order. The first one whose groups yield an
    /// active endpoint wins.
    pub fn resolve_by_priority(&self, servant: &str, client_ip: &str) -> Result<Resolution, NotFound> {
        self.metrics.record_lookup(Strategy::Priority);
        let snapshot = self.snapshot.read();
        let Some(group) = snapshot.groups.resolve_by_ip(client_ip) else {
            tracing::debug!("[resolver] no group for {client_ip}, resolve {servant} plainly");
            let entry = self.entry(&snapshot, servant)?;
            return Ok(self.finish(servant, Resolution::from_entry(entry)));
        };
        let entry = self.entry(&snapshot, servant)?;

        let mut resolution = filter_by_group(entry, GroupField::Work, GroupTarget::One(Some(group)));
        if resolution.active.is_empty() {
            if let Some((id, found)) = snapshot
                .priorities
                .iter()
                .filter(|priority| priority.contains(group))
                .map(|priority| {
                    (
                        priority.id.as_str(),
                        filter_by_group(entry, GroupField::Work, GroupTarget::Any(&priority.groups)),
                    )
                })
                .find(|(_, found)| !found.active.is_empty())
            {
                tracing::debug!("[resolver] {servant} resolved by priority entry {id} for group {group}");
                resolution = found;
            }
        }
        if resolution.active.is_empty() {
            resolution = filter_by_group(entry, GroupField::Work, GroupTarget::One(None));
        }
        if resolution.active.is_empty() {
            resolution = Resolution::from_entry(entry);
        }
        Ok(self.finish(servant, resolution))
    }

    /// Endpoints whose real group belongs to the first priority entry labelled `station`.
    ///
    /// There is no fallback: an empty answer is valid.
    pub fn resolve_by_station(&self, servant: &str, station: &str) -> Result<Resolution, NotFound> {
        self.metrics.record_lookup(Strategy::Station);
        let snapshot = self.snapshot.read();
        let Some(priority) = snapshot.priorities.find_station(station) else {
            self.metrics.record_not_found();
            return Err(NotFound::Station(station.to_string()));
        };
        let entry = self.entry(&snapshot, servant)?;
        let resolution = filter_by_group(entry, GroupField::Real, GroupTarget::Any(&priority.groups));
        Ok(self.finish(servant, resolution))
    }

    /// Endpoints in a set partition.
    ///
    /// With a `*` group, every member of `name.area` is returned. Otherwise the exact `name.area.group` members are
    /// returned, falling back to the `name.area.*` members.
    pub fn resolve_by_set(&self, servant: &str, division: &SetDivision) -> Result<Resolution, NotFound> {
        self.metrics.record_lookup(Strategy::Set);
        let snapshot = self.snapshot.read();
        let not_found = || {
            self.metrics.record_not_found();
            tracing::debug!("[resolver] {servant} does not take part in set {division}");
            NotFound::SetPartition {
                servant: servant.to_string(),
                set: division.to_string(),
            }
        };

        let Some(members) = snapshot.sets.members(servant, &division.name) else {
            return Err(not_found());
        };

        let resolution = if division.is_wildcard_group() {
            let set_area = division.set_area();
            collect_members(members, |info| info.set_area == set_area)
        } else {
            let set_id = division.set_id();
            let exact = collect_members(members, |info| info.set_id == set_id);
            if exact.active.is_empty() && exact.inactive.is_empty() {
                let wildcard_id = division.wildcard_set_id();
                collect_members(members, |info| info.set_id == wildcard_id)
            } else {
                exact
            }
        };

        if resolution.active.is_empty() && resolution.inactive.is_empty() {
            return Err(not_found());
        }
        Ok(self.finish(servant, resolution))
    }

    /// Servants whose first active endpoint asks for dynamic weighting.
    pub fn dynamic_weight_servants(&self) -> Vec<String> {
        let snapshot = self.snapshot.read();
        let mut servants = snapshot
            .objects
            .iter()
            .filter(|(_, entry)| {
                entry
                    .active()
                    .first()
                    .is_some_and(|endpoint| endpoint.weight_policy == WeightPolicy::Dynamic)
            })
            .map(|(servant, _)| servant.to_string())
            .collect::<Vec<_>>();
        servants.sort();
        servants
    }

    fn entry<'a>(&self, snapshot: &'a RegistrySnapshot, servant: &str) -> Result<&'a ObjectsCacheEntry, NotFound> {
        snapshot.objects.get(servant).ok_or_else(|| {
            self.metrics.record_not_found();
            tracing::debug!("[resolver] servant {servant} not found");
            NotFound::Servant(servant.to_string())
        })
    }

    fn finish(&self, servant: &str, mut resolution: Resolution) -> Resolution {
        resolution.active = self.weight.apply(servant, resolution.active);
        resolution
    }
}

#[cfg(test)]
mod tests {
    use locus_cache::{
        endpoint::EndpointAddress,
        group::{GroupIndex, GroupPriorityEntry, GroupPriorityTable, GroupRule},
        objects::ObjectsCache,
        set::{SetDivisionIndex, SetServerInfo},
    };

    use super::*;
    use crate::collaborator::StaticWeight;

    const SERVANT: &str = "App.Server.Obj";

    fn endpoint(host: &str, work_group: Option<GroupId>) -> EndpointRecord {
        let address: EndpointAddress = format!("tcp -h {host} -p 10000").parse().unwrap();
        let mut endpoint = EndpointRecord::new(address).with_group(work_group, true);
        if work_group.is_none() {
            endpoint.real_group = Some(9);
        }
        endpoint
    }

    fn hosts(endpoints: &[EndpointRecord]) -> Vec<&str> {
        endpoints.iter().map(|e| e.host.as_str()).collect()
    }

    fn new_resolver(active: Vec<EndpointRecord>, inactive: Vec<EndpointRecord>, sets: SetDivisionIndex) -> Resolver {
        let groups = GroupIndex::build(&[
            GroupRule {
                group_id: 1,
                rank: 0,
                patterns: vec!["192.168.1.*".to_string()],
                name: "g1".to_string(),
            },
            GroupRule {
                group_id: 4,
                rank: 1,
                patterns: vec!["192.168.4.4".to_string()],
                name: "g4".to_string(),
            },
        ]);
        let priorities = GroupPriorityTable::build([
            GroupPriorityEntry {
                id: "p0".to_string(),
                rank: 0,
                station: "east".to_string(),
                groups: [1, 3].into_iter().collect(),
            },
            GroupPriorityEntry {
                id: "p1".to_string(),
                rank: 1,
                station: "west".to_string(),
                groups: [1, 2].into_iter().collect(),
            },
        ]);
        let mut objects = ObjectsCache::default();
        let entry = objects.entry_mut(SERVANT);
        for endpoint in active {
            entry.insert(endpoint, true);
        }
        for endpoint in inactive {
            entry.insert(endpoint, false);
        }

        let snapshot = RegistrySnapshot {
            groups: Arc::new(groups),
            priorities: Arc::new(priorities),
            objects: Arc::new(objects),
            sets: Arc::new(sets),
        };
        Resolver::new(
            Arc::new(SnapshotCache::new(snapshot)),
            Arc::new(StaticWeight),
            Arc::new(Metrics::noop()),
        )
    }

    #[test]
    fn test_plain_and_unknown_servant() {
        let resolver = new_resolver(
            vec![endpoint("10.0.0.1", Some(1))],
            vec![endpoint("10.0.0.2", Some(2))],
            SetDivisionIndex::default(),
        );
        let resolution = resolver.resolve_plain(SERVANT).unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.1"]);
        assert_eq!(hosts(&resolution.inactive), vec!["10.0.0.2"]);
        assert_eq!(hosts(&resolver.resolve_active(SERVANT).unwrap()), vec!["10.0.0.1"]);

        assert_eq!(
            resolver.resolve_plain("App.Server.Missing"),
            Err(NotFound::Servant("App.Server.Missing".to_string()))
        );
        assert!(resolver.resolve_by_group("App.Server.Missing", "192.168.1.1").is_err());
    }

    #[test_log::test]
    fn test_group_fallbacks() {
        let resolver = new_resolver(
            vec![
                endpoint("10.0.0.1", Some(1)),
                endpoint("10.0.0.2", Some(2)),
                endpoint("10.0.0.3", None),
            ],
            vec![endpoint("10.0.0.4", Some(1))],
            SetDivisionIndex::default(),
        );

        // own group
        let resolution = resolver.resolve_by_group(SERVANT, "192.168.1.77").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.1"]);
        assert_eq!(hosts(&resolution.inactive), vec!["10.0.0.4"]);

        // ungrouped
        let resolution = resolver.resolve_by_group(SERVANT, "192.168.4.4").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.3"]);

        // unknown client group
        assert_eq!(
            resolver.resolve_by_group(SERVANT, "172.16.0.1").unwrap(),
            resolver.resolve_plain(SERVANT).unwrap()
        );
    }

    #[test]
    fn test_group_falls_back_to_everything() {
        let resolver = new_resolver(
            vec![endpoint("10.0.0.2", Some(2))],
            vec![endpoint("10.0.0.1", Some(1))],
            SetDivisionIndex::default(),
        );

        // the own-group match has no active endpoint, so it does not count
        let resolution = resolver.resolve_by_group(SERVANT, "192.168.1.1").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.2"]);
        assert_eq!(hosts(&resolution.inactive), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_priority_order() {
        let resolver = new_resolver(
            vec![
                endpoint("10.0.0.2", Some(2)),
                endpoint("10.0.0.3", Some(3)),
                endpoint("10.0.0.9", None),
            ],
            vec![],
            SetDivisionIndex::default(),
        );

        // group 1 has no endpoint, rank 0 covers {1, 3} and wins over rank 1 covering {1, 2}
        let resolution = resolver.resolve_by_priority(SERVANT, "192.168.1.1").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.3"]);

        // group 4 is in no priority entry, ungrouped wins
        let resolution = resolver.resolve_by_priority(SERVANT, "192.168.4.4").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.9"]);
    }

    #[test]
    fn test_priority_keeps_scanning() {
        let resolver = new_resolver(
            vec![endpoint("10.0.0.2", Some(2)), endpoint("10.0.0.9", None)],
            vec![endpoint("10.0.0.3", Some(3))],
            SetDivisionIndex::default(),
        );

        // rank 0 covers {1, 3} but group 3 is inactive, rank 1 covering {1, 2} answers before ungrouped
        let resolution = resolver.resolve_by_priority(SERVANT, "192.168.1.1").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.2"]);
        assert!(resolution.inactive.is_empty());
    }

    #[test]
    fn test_priority_prefers_exact_group() {
        let resolver = new_resolver(
            vec![endpoint("10.0.0.1", Some(1)), endpoint("10.0.0.3", Some(3))],
            vec![],
            SetDivisionIndex::default(),
        );
        let resolution = resolver.resolve_by_priority(SERVANT, "192.168.1.1").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_station() {
        let resolver = new_resolver(
            vec![endpoint("10.0.0.2", Some(2)), endpoint("10.0.0.3", Some(3))],
            vec![endpoint("10.0.0.1", Some(1))],
            SetDivisionIndex::default(),
        );

        let resolution = resolver.resolve_by_station(SERVANT, "east").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.3"]);
        assert_eq!(hosts(&resolution.inactive), vec!["10.0.0.1"]);

        assert_eq!(
            resolver.resolve_by_station(SERVANT, "north"),
            Err(NotFound::Station("north".to_string()))
        );
    }

    #[test]
    fn test_station_uses_real_group() {
        let mut ungrouped = endpoint("10.0.0.2", None);
        ungrouped.real_group = Some(2);
        let resolver = new_resolver(vec![ungrouped], vec![], SetDivisionIndex::default());

        let resolution = resolver.resolve_by_station(SERVANT, "west").unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.2"]);
        // empty is a valid answer
        assert!(resolver.resolve_by_station(SERVANT, "east").unwrap().active.is_empty());
    }

    #[test]
    fn test_set() {
        let mut sets = SetDivisionIndex::default();
        for (host, id, active) in [
            ("10.0.0.1", "svcSet.areaA.1", true),
            ("10.0.0.2", "svcSet.areaA.2", false),
            ("10.0.0.3", "svcSet.areaA.*", true),
            ("10.0.0.4", "svcSet.areaB.1", true),
        ] {
            let division: SetDivision = id.parse().unwrap();
            sets.insert(
                SERVANT,
                &division.name,
                SetServerInfo::new(&division, active, endpoint(host, None)),
            );
        }
        let resolver = new_resolver(vec![], vec![], sets);

        let resolution = resolver
            .resolve_by_set(SERVANT, &SetDivision::new("svcSet", "areaA", "*"))
            .unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(hosts(&resolution.inactive), vec!["10.0.0.2"]);

        let resolution = resolver
            .resolve_by_set(SERVANT, &SetDivision::new("svcSet", "areaA", "1"))
            .unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.1"]);

        // falls back to the wildcard group
        let resolution = resolver
            .resolve_by_set(SERVANT, &SetDivision::new("svcSet", "areaA", "7"))
            .unwrap();
        assert_eq!(hosts(&resolution.active), vec!["10.0.0.3"]);

        // no member and no wildcard group
        assert!(matches!(
            resolver.resolve_by_set(SERVANT, &SetDivision::new("svcSet", "areaB", "7")),
            Err(NotFound::SetPartition { .. })
        ));
        // the wildcard query never consults the wildcard fallback
        assert!(resolver
            .resolve_by_set(SERVANT, &SetDivision::new("svcSet", "areaC", "*"))
            .is_err());
        assert!(resolver
            .resolve_by_set(SERVANT, &SetDivision::new("other", "areaA", "1"))
            .is_err());
    }

    #[test]
    fn test_dynamic_weight_servants() {
        let mut dynamic = endpoint("10.0.0.1", None);
        dynamic.weight_policy = WeightPolicy::Dynamic;
        let resolver = new_resolver(vec![dynamic], vec![], SetDivisionIndex::default());
        assert_eq!(resolver.dynamic_weight_servants(), vec![SERVANT.to_string()]);

        let resolver = new_resolver(vec![endpoint("10.0.0.1", None)], vec![], SetDivisionIndex::default());
        assert!(resolver.dynamic_weight_servants().is_empty());
    }
}
