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

use std::sync::Arc;

use crate::{
    group::{GroupIndex, GroupPriorityTable},
    objects::ObjectsCache,
    set::SetDivisionIndex,
};

/// One generation of the lookup caches.
///
/// Every part sits behind its own [`Arc`], so cloning a snapshot is cheap and a reload that leaves a part untouched
/// shares it with the previous generation.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Client IP and group name to group id.
    pub groups: Arc<GroupIndex>,
    /// Priority table ordered by rank.
    pub priorities: Arc<GroupPriorityTable>,
    /// Active and inactive endpoints per servant.
    pub objects: Arc<ObjectsCache>,
    /// Set members per servant.
    pub sets: Arc<SetDivisionIndex>,
}

impl RegistrySnapshot {
    /// Derive a generation that keeps the group data and swaps the servant data.
    pub fn with_servants(&self, objects: ObjectsCache, sets: SetDivisionIndex) -> Self {
        Self {
            groups: self.groups.clone(),
            priorities: self.priorities.clone(),
            objects: Arc::new(objects),
            sets: Arc::new(sets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupRule;

    #[test]
    fn test_with_servants_shares_group_data() {
        let groups = GroupIndex::build(&[GroupRule {
            group_id: 1,
            rank: 0,
            patterns: vec!["10.0.0.*".to_string()],
            name: "g1".to_string(),
        }]);
        let snapshot = RegistrySnapshot {
            groups: Arc::new(groups),
            ..Default::default()
        };

        let next = snapshot.with_servants(ObjectsCache::default(), SetDivisionIndex::default());
        assert!(Arc::ptr_eq(&snapshot.groups, &next.groups));
        assert!(Arc::ptr_eq(&snapshot.priorities, &next.priorities));
        assert!(!Arc::ptr_eq(&snapshot.objects, &next.objects));
        assert_eq!(next.groups.resolve_by_ip("10.0.0.7"), Some(1));
    }
}
