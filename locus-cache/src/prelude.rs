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

pub use crate::{
    endpoint::{EndpointAddress, EndpointRecord, GroupId, Transport, WeightPolicy},
    group::{parse_group_list, wildcard_key, GroupIndex, GroupPriorityEntry, GroupPriorityTable, GroupRule},
    objects::{ObjectsCache, ObjectsCacheEntry},
    set::{partition_members, SetDivision, SetDivisionIndex, SetServerInfo, ServantSets},
    snapshot::RegistrySnapshot,
    status::{
        NodeStateUpdate, ServerState, StateGroup, StateMap, StateUpdate, StatusKey, StatusTracker, SyncReport,
    },
};
