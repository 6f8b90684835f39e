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

use std::{borrow::Cow, fmt::Display, sync::Arc};

use atrium_common::{
    code::{Key, Value},
    error::{Error, ErrorKind, Result},
    event::{EventRecorder, NoopEventRecorder},
    metrics::{registry::noop::NoopMetricsRegistry, BoxedRegistry, Metrics, RegistryOps},
};

use crate::{
    manager::{EvictionManager, EvictionManagerConfig},
    message::{NoopResponseSender, ResponseSender},
    partition::PartitionCoordinator,
    swap::{NoopSwapWriter, SwapWriter},
    table::EntryTable,
    version::VersionGenerator,
};

/// Distribution mode of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CacheMode {
    /// Keys are partitioned across nodes.
    #[default]
    Partitioned,
    /// Every node keeps all partitions.
    Replicated,
    /// The cache lives on the local node only and is never rebalanced.
    Local,
    /// A near cache in front of a partitioned cache. Near caches never coordinate with partitions.
    Near,
}

impl CacheMode {
    /// Returns `true` for near caches.
    pub fn is_near(self) -> bool {
        matches!(self, Self::Near)
    }

    /// Returns `true` if the cache is distributed by partitions and may be rebalanced.
    pub fn is_distributed(self) -> bool {
        matches!(self, Self::Partitioned | Self::Replicated)
    }
}

impl Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Partitioned => "partitioned",
            Self::Replicated => "replicated",
            Self::Local => "local",
            Self::Near => "near",
        };
        f.write_str(s)
    }
}

/// Builder of an [`EvictionManager`].
pub struct EvictionManagerBuilder<K, V>
where
    K: Key,
    V: Value,
{
    name: Cow<'static, str>,
    mode: CacheMode,
    rebalance: bool,
    statistics: bool,
    table: Option<Arc<dyn EntryTable<K, V>>>,
    coordinator: Option<Arc<dyn PartitionCoordinator<K>>>,
    swap_writer: Arc<dyn SwapWriter<Key = K, Value = V>>,
    event_recorder: Arc<dyn EventRecorder<Key = K, Value = V>>,
    response_sender: Arc<dyn ResponseSender<Key = K>>,
    versions: Arc<VersionGenerator>,
    registry: BoxedRegistry,
}

impl<K, V> EvictionManagerBuilder<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a builder for the cache with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            mode: CacheMode::default(),
            rebalance: true,
            statistics: false,
            table: None,
            coordinator: None,
            swap_writer: Arc::new(NoopSwapWriter::default()),
            event_recorder: Arc::new(NoopEventRecorder::default()),
            response_sender: Arc::new(NoopResponseSender::default()),
            versions: Arc::new(VersionGenerator::default()),
            registry: Box::new(NoopMetricsRegistry),
        }
    }

    /// Set the distribution mode of the cache.
    ///
    /// Default: [`CacheMode::Partitioned`].
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable rebalance awareness.
    ///
    /// Only distributed caches are rebalanced, the flag is ignored by local and near caches.
    ///
    /// Default: `true`.
    pub fn with_rebalance(mut self, rebalance: bool) -> Self {
        self.rebalance = rebalance;
        self
    }

    /// Enable or disable eviction statistics.
    ///
    /// Default: `false`.
    pub fn with_statistics(mut self, statistics: bool) -> Self {
        self.statistics = statistics;
        self
    }

    /// Set the live entry table of the cache. Required.
    pub fn with_entry_table(mut self, table: Arc<dyn EntryTable<K, V>>) -> Self {
        self.table = Some(table);
        self
    }

    /// Set the partition coordinator. Required by rebalance-aware distributed caches.
    pub fn with_partition_coordinator(mut self, coordinator: Arc<dyn PartitionCoordinator<K>>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the swap writer of batch evictions.
    ///
    /// Default: a writer that swaps nothing.
    pub fn with_swap_writer(mut self, swap_writer: Arc<dyn SwapWriter<Key = K, Value = V>>) -> Self {
        self.swap_writer = swap_writer;
        self
    }

    /// Set the event recorder.
    ///
    /// Default: a recorder that records nothing.
    pub fn with_event_recorder(mut self, event_recorder: Arc<dyn EventRecorder<Key = K, Value = V>>) -> Self {
        self.event_recorder = event_recorder;
        self
    }

    /// Set the delivery channel of eviction responses.
    ///
    /// Default: a sender that drops every response.
    pub fn with_response_sender(mut self, response_sender: Arc<dyn ResponseSender<Key = K>>) -> Self {
        self.response_sender = response_sender;
        self
    }

    /// Set the version generator shared with the cache runtime.
    pub fn with_version_generator(mut self, versions: Arc<VersionGenerator>) -> Self {
        self.versions = versions;
        self
    }

    /// Set the metrics registry.
    ///
    /// Default: [`NoopMetricsRegistry`].
    pub fn with_metrics_registry(mut self, registry: impl RegistryOps) -> Self {
        self.registry = Box::new(registry);
        self
    }

    /// Build the eviction manager.
    ///
    /// The manager is not started yet, see [`EvictionManager::start`].
    pub fn build(self) -> Result<EvictionManager<K, V>> {
        let table = self
            .table
            .ok_or_else(|| Error::new(ErrorKind::Config, "entry table is required").with_context("cache", &self.name))?;

        let rebalance = self.rebalance && self.mode.is_distributed();
        if rebalance && self.coordinator.is_none() {
            return Err(Error::new(
                ErrorKind::Config,
                "partition coordinator is required by rebalance-aware caches",
            )
            .with_context("cache", &self.name)
            .with_context("mode", self.mode));
        }

        let metrics = Arc::new(Metrics::new(self.name.clone(), self.registry.as_ref()));

        Ok(EvictionManager::new(EvictionManagerConfig {
            name: self.name,
            mode: self.mode,
            rebalance,
            statistics: self.statistics,
            table,
            coordinator: self.coordinator,
            swap_writer: self.swap_writer,
            event_recorder: self.event_recorder,
            response_sender: self.response_sender,
            versions: self.versions,
            metrics,
        }))
    }
}
