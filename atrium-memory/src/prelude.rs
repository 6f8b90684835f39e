// Copyright 2026 atrium Project Authors
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
    builder::{CacheMode, EvictionManagerBuilder},
    manager::{version_filter, EvictionInfo, EvictionManager, PartitionGuard, TopologyGuard},
    message::{EvictionRequest, EvictionResponse, NodeId, NoopResponseSender, ResponseSender},
    partition::{LocalTopology, Partition, PartitionCoordinator, PartitionId, PartitionState},
    policy::{EntryPredicate, EvictionFilter, EvictionPolicy},
    record::{CacheEntry, EntryGuard, EntryView, Flags, TxEntry},
    stats::EvictionStats,
    swap::{NoopSwapWriter, SwapRecord, SwapWriter},
    table::{EntryTable, ShardedEntryTable},
    version::{TopologyVersion, Version, VersionGenerator},
};
