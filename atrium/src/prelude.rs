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

#[cfg(feature = "prometheus")]
pub use crate::common::metrics::registry::prometheus::PrometheusMetricsRegistry;
pub use crate::{
    common::{
        busy::{BusyGate, BusyGuard},
        code::{Key, Value},
        error::{Error, ErrorKind, Result},
        event::{Event, EventRecorder, NoopEventRecorder},
        metrics::{registry::noop::NoopMetricsRegistry, RegistryOps},
    },
    memory::{
        version_filter, CacheEntry, CacheMode, EntryGuard, EntryPredicate, EntryTable, EntryView, EvictionFilter,
        EvictionInfo, EvictionManager, EvictionManagerBuilder, EvictionPolicy, EvictionRequest, EvictionResponse,
        EvictionStats, Flags, LocalTopology, NodeId, NoopResponseSender, NoopSwapWriter, Partition, PartitionCoordinator,
        PartitionGuard, PartitionId, PartitionState, ResponseSender, ShardedEntryTable, SwapRecord, SwapWriter,
        TopologyGuard, TopologyVersion, TxEntry, Version, VersionGenerator,
    },
};
