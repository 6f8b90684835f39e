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

use std::{
    borrow::Cow,
    fmt::Debug,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use arc_swap::ArcSwapOption;
use atrium_common::{
    busy::{BusyGate, BusyGuard},
    code::{Key, Value},
    error::{Error, ErrorKind, Result},
    event::{Event, EventRecorder},
    metrics::{BoxedGauge, Metrics},
    strict_assert, strict_assert_eq,
};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    builder::CacheMode,
    message::{EvictionRequest, EvictionResponse, NodeId, ResponseSender},
    partition::{Partition, PartitionCoordinator, PartitionId, PartitionState},
    policy::{EntryPredicate, EvictionFilter, EvictionPolicy},
    record::{CacheEntry, EntryView, TxEntry},
    stats::{EvictionStats, StatsCounters},
    swap::SwapWriter,
    table::EntryTable,
    version::{TopologyVersion, Version, VersionGenerator},
};

/// An entry scheduled for eviction together with the version it was observed at.
pub struct EvictionInfo<K, V> {
    /// The entry to evict.
    pub entry: Arc<CacheEntry<K, V>>,
    /// Version of the entry when it was picked.
    pub version: Version,
    /// Additional admission filter.
    pub filter: Option<Arc<dyn EntryPredicate<K, V>>>,
}

impl<K, V> Debug for EvictionInfo<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionInfo")
            .field("entry", &self.entry)
            .field("version", &self.version)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl<K, V> EvictionInfo<K, V> {
    /// Create an eviction info without additional filter.
    pub fn new(entry: Arc<CacheEntry<K, V>>, version: Version) -> Self {
        Self {
            entry,
            version,
            filter: None,
        }
    }

    /// Attach an admission filter.
    pub fn with_filter(mut self, filter: Arc<dyn EntryPredicate<K, V>>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Build the admission filter of a policy-triggered eviction.
///
/// The entry is only admitted if its version has not changed since it was observed and the additional filter of the
/// info (if any) admits it.
pub fn version_filter<'a, K, V>(info: &'a EvictionInfo<K, V>) -> impl for<'e> Fn(EntryView<'e, K, V>) -> bool + 'a
where
    K: Key,
    V: Value,
{
    move |view| view.version() == info.version && info.filter.as_deref().is_none_or(|filter| filter(view))
}

/// Scoped holder of the shared topology lock. Releases the lock on drop.
#[must_use = "the topology is unlocked as soon as the guard is dropped"]
pub struct TopologyGuard<'a, K: 'static> {
    coordinator: Option<&'a dyn PartitionCoordinator<K>>,
    version: TopologyVersion,
}

impl<K: 'static> Debug for TopologyGuard<'_, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyGuard")
            .field("locked", &self.coordinator.is_some())
            .field("version", &self.version)
            .finish()
    }
}

impl<K: 'static> TopologyGuard<'_, K> {
    /// Topology version observed right after the lock was acquired.
    pub fn version(&self) -> TopologyVersion {
        self.version
    }
}

impl<K: 'static> Drop for TopologyGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator {
            coordinator.read_unlock_topology();
        }
    }
}

/// Scoped holder of a reserved and locked partition. Unlocks and releases the partition on drop.
///
/// The partition lock belongs to the thread that acquired it, so the guard cannot be sent to another thread.
#[must_use = "the partition is unlocked as soon as the guard is dropped"]
pub struct PartitionGuard<K> {
    partition: Arc<Partition<K>>,
    _not_send: PhantomData<*const ()>,
}

impl<K> Debug for PartitionGuard<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionGuard").field("partition", &self.partition).finish()
    }
}

impl<K> PartitionGuard<K> {
    /// The locked partition.
    pub fn partition(&self) -> &Arc<Partition<K>> {
        &self.partition
    }
}

impl<K> Drop for PartitionGuard<K> {
    fn drop(&mut self) {
        tracing::trace!(partition = self.partition.id(), "[eviction manager]: unlock partition");
        self.partition.unlock();
        self.partition.release();
    }
}

/// Release scoped guards in the reverse order of their acquisition.
pub(crate) fn unlock_reversed<G>(mut guards: Vec<G>) {
    while let Some(guard) = guards.pop() {
        drop(guard);
    }
}

/// An operation admitted by the busy gate of the manager.
struct Admission<'a> {
    _busy: BusyGuard<'a>,
    in_flight: &'a BoxedGauge,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.in_flight.decrease(1);
    }
}

struct Plugins<K, V> {
    policy: Option<Arc<dyn EvictionPolicy<Key = K, Value = V>>>,
    filter: Option<Arc<dyn EvictionFilter<Key = K, Value = V>>>,
}

pub(crate) struct EvictionManagerConfig<K, V>
where
    K: Key,
    V: Value,
{
    pub name: Cow<'static, str>,
    pub mode: CacheMode,
    pub rebalance: bool,
    pub statistics: bool,
    pub table: Arc<dyn EntryTable<K, V>>,
    pub coordinator: Option<Arc<dyn PartitionCoordinator<K>>>,
    pub swap_writer: Arc<dyn SwapWriter<Key = K, Value = V>>,
    pub event_recorder: Arc<dyn EventRecorder<Key = K, Value = V>>,
    pub response_sender: Arc<dyn ResponseSender<Key = K>>,
    pub versions: Arc<VersionGenerator>,
    pub metrics: Arc<Metrics>,
}

struct Inner<K, V>
where
    K: Key,
    V: Value,
{
    name: Cow<'static, str>,
    mode: CacheMode,
    rebalance: bool,
    statistics: bool,

    table: Arc<dyn EntryTable<K, V>>,
    coordinator: Option<Arc<dyn PartitionCoordinator<K>>>,
    swap_writer: Arc<dyn SwapWriter<Key = K, Value = V>>,
    event_recorder: Arc<dyn EventRecorder<Key = K, Value = V>>,
    response_sender: Arc<dyn ResponseSender<Key = K>>,
    versions: Arc<VersionGenerator>,

    plugins: ArcSwapOption<Plugins<K, V>>,
    lifecycle: Mutex<()>,
    stopped: AtomicBool,
    busy: BusyGate,
    first_evict_warned: AtomicBool,

    stats: StatsCounters,
    metrics: Arc<Metrics>,
}

/// Eviction manager of one cache.
///
/// The manager executes evictions requested by the cache runtime or by the eviction policy, and reports entry accesses
/// to the policy. All operations are synchronous and may be called concurrently from any thread.
///
/// Entries are evicted at most once per version: every eviction path commits with a version-checked transition of the
/// entry, concurrent attempts converge to exactly one winner.
pub struct EvictionManager<K, V>
where
    K: Key,
    V: Value,
{
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for EvictionManager<K, V>
where
    K: Key,
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for EvictionManager<K, V>
where
    K: Key,
    V: Value,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionManager")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("rebalance", &self.inner.rebalance)
            .field("statistics", &self.inner.statistics)
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<K, V> EvictionManager<K, V>
where
    K: Key,
    V: Value,
{
    pub(crate) fn new(config: EvictionManagerConfig<K, V>) -> Self {
        let inner = Inner {
            name: config.name,
            mode: config.mode,
            rebalance: config.rebalance,
            statistics: config.statistics,
            table: config.table,
            coordinator: config.coordinator,
            swap_writer: config.swap_writer,
            event_recorder: config.event_recorder,
            response_sender: config.response_sender,
            versions: config.versions,
            plugins: ArcSwapOption::empty(),
            lifecycle: Mutex::new(()),
            stopped: AtomicBool::new(false),
            busy: BusyGate::new(),
            first_evict_warned: AtomicBool::new(false),
            stats: StatsCounters::default(),
            metrics: config.metrics,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Distribution mode of the cache.
    pub fn cache_mode(&self) -> CacheMode {
        self.inner.mode
    }

    /// Returns `true` if evictions coordinate with partition rebalancing.
    pub fn is_rebalance_aware(&self) -> bool {
        self.inner.rebalance
    }

    /// Returns `true` once [`EvictionManager::start`] has succeeded.
    pub fn is_started(&self) -> bool {
        self.inner.plugins.load().is_some()
    }

    /// Returns `true` once [`EvictionManager::stop`] has returned.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Returns `true` if the manager was started with an eviction policy.
    pub fn is_policy_enabled(&self) -> bool {
        self.enabled_plugins().is_some()
    }

    /// Start the manager with the given policy and filter.
    ///
    /// Without a policy all policy notifications are skipped. Lazy cleanup on touch keeps working.
    pub fn start(
        &self,
        policy: Option<Arc<dyn EvictionPolicy<Key = K, Value = V>>>,
        filter: Option<Arc<dyn EvictionFilter<Key = K, Value = V>>>,
    ) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        if self.is_stopped() {
            return Err(Error::closed("eviction manager has been stopped").with_context("cache", &self.inner.name));
        }
        if self.is_started() {
            return Err(Error::new(ErrorKind::Config, "eviction manager has already been started")
                .with_context("cache", &self.inner.name));
        }
        let enabled = policy.is_some();
        self.inner.plugins.store(Some(Arc::new(Plugins { policy, filter })));
        tracing::debug!(
            cache = %self.inner.name,
            policy = enabled,
            "[eviction manager]: Eviction manager started."
        );
        Ok(())
    }

    /// Stop the manager.
    ///
    /// New operations are refused from the moment this is called. Returns after all in-flight operations have left.
    /// Every operation invoked afterwards is a no-op.
    ///
    /// Calling this from within an eviction callback (policy, filter, writer or recorder) deadlocks.
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.busy.block();
        self.inner.stopped.store(true, Ordering::Release);
        tracing::debug!(cache = %self.inner.name, "[eviction manager]: Eviction manager stopped.");
        self.inner.busy.unblock();
    }

    fn enter(&self) -> Option<Admission<'_>> {
        let busy = self.inner.busy.enter()?;
        if self.is_stopped() {
            return None;
        }
        let in_flight = &self.inner.metrics.eviction_in_flight;
        in_flight.increase(1);
        Some(Admission { _busy: busy, in_flight })
    }

    fn enabled_plugins(&self) -> Option<Arc<Plugins<K, V>>> {
        self.inner.plugins.load_full().filter(|plugins| plugins.policy.is_some())
    }

    /// Evict a single entry.
    ///
    /// Returns `true` if the entry was marked obsolete and removed from the entry table by this call. An absent entry
    /// is vacuously evicted. Internal entries are never evicted.
    ///
    /// `version_hint` is stamped on the evicted entry, a fresh version is minted if absent. `explicit` marks evictions
    /// requested by the user rather than by the policy; the policy is told to forget explicitly evicted entries.
    ///
    /// A `false` result means the entry was left in place, it is never an error.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::evict"))]
    pub fn evict(
        &self,
        entry: Option<&Arc<CacheEntry<K, V>>>,
        version_hint: Option<Version>,
        explicit: bool,
        filter: Option<&dyn Fn(EntryView<'_, K, V>) -> bool>,
    ) -> bool {
        let Some(entry) = entry else {
            return true;
        };
        if entry.is_internal() {
            return false;
        }
        let Some(_busy) = self.enter() else {
            return false;
        };
        self.evict_internal(entry, version_hint, explicit, |view| filter.is_none_or(|f| f(view)))
    }

    /// Evict an entry picked by the eviction policy, only if it has not changed since it was picked.
    ///
    /// Rebalance-aware caches evict under the shared topology lock and, if the partition of the entry is moving, under
    /// the partition lock. Evictions from moving partitions are recorded for rebalancing.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::evict_if_unchanged"))]
    pub fn evict_if_unchanged(&self, info: EvictionInfo<K, V>) -> bool {
        if info.entry.is_internal() {
            return false;
        }
        let Some(_busy) = self.enter() else {
            return false;
        };
        self.evict_unchanged(&info)
    }

    fn evict_unchanged(&self, info: &EvictionInfo<K, V>) -> bool {
        let entry = &info.entry;

        if !self.inner.rebalance {
            return self.evict_internal(entry, None, false, version_filter(info));
        }

        let _topology = self.lock_topology();
        let partition = self.lock_partition(entry.partition());
        let evicted = self.evict_internal(entry, None, false, version_filter(info));
        if evicted {
            if let Some(partition) = partition.as_ref() {
                self.save_eviction_info(partition, entry.key(), info.version);
            }
        }
        evicted
    }

    fn evict_internal<F>(&self, entry: &Arc<CacheEntry<K, V>>, version_hint: Option<Version>, explicit: bool, filter: F) -> bool
    where
        F: FnOnce(EntryView<'_, K, V>) -> bool,
    {
        if entry.is_internal() {
            return false;
        }
        if !self.inner.mode.is_near() && !explicit {
            self.warn_first_evict();
        }
        let obsolete_version = version_hint.unwrap_or_else(|| self.inner.versions.next());
        self.evict0(entry, obsolete_version, filter, explicit)
    }

    fn evict0<F>(&self, entry: &Arc<CacheEntry<K, V>>, obsolete_version: Version, filter: F, explicit: bool) -> bool
    where
        F: FnOnce(EntryView<'_, K, V>) -> bool,
    {
        let recordable = self.inner.event_recorder.is_recordable(Event::Evicted);
        let mut old_value = None;

        // The filter runs under the entry lock, so the value captured here is the one being released.
        let admitted = |view: EntryView<'_, K, V>| {
            if !filter(view) {
                return false;
            }
            if recordable {
                old_value = view.value();
            }
            true
        };

        if !entry.evict_if(admitted, obsolete_version) {
            self.inner.metrics.eviction_reject.increase(1);
            tracing::debug!(
                cache = %self.inner.name,
                key = ?entry.key(),
                "[eviction manager]: Entry was not evicted."
            );
            return false;
        }

        if explicit {
            if let Some(plugins) = self.enabled_plugins() {
                self.notify_policy(&plugins, entry);
            }
        }
        self.remove_from_table(entry);

        if self.inner.statistics {
            self.inner.stats.on_evict();
        }
        self.inner.metrics.eviction_evict.increase(1);

        if recordable {
            self.inner
                .event_recorder
                .record_eviction(entry.partition(), entry.key(), old_value.as_deref(), old_value.is_some());
        }

        tracing::debug!(
            cache = %self.inner.name,
            key = ?entry.key(),
            version = %obsolete_version,
            "[eviction manager]: Entry was evicted."
        );
        true
    }

    fn warn_first_evict(&self) {
        if self.inner.first_evict_warned.load(Ordering::Relaxed) {
            return;
        }
        if self
            .inner
            .first_evict_warned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        tracing::warn!(
            "[eviction manager]: Evictions started (cache may have reached its capacity). \
             You may wish to increase the capacity of the eviction policy used by cache: {}",
            self.inner.name
        );
    }

    fn remove_from_table(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
        match self.inner.table.remove_entry(entry) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(
                    cache = %self.inner.name,
                    key = ?entry.key(),
                    "[eviction manager]: Failed to remove entry from the entry table, error: {e}"
                );
                false
            }
        }
    }

    /// Report an access to `entry` to the eviction policy.
    ///
    /// Entries that are obsolete, or empty and can be marked obsolete, are removed from the entry table first. The
    /// cleanup runs even if the policy is disabled.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::touch"))]
    pub fn touch(&self, entry: &Arc<CacheEntry<K, V>>, topology_version: TopologyVersion) {
        if entry.is_detached() || entry.is_internal() {
            return;
        }
        let Some(_busy) = self.enter() else {
            return;
        };

        self.cleanup(entry);

        if self.inner.statistics {
            self.inner.stats.on_touch();
        }
        self.inner.metrics.eviction_touch.increase(1);

        let Some(plugins) = self.enabled_plugins() else {
            return;
        };
        tracing::debug!(
            cache = %self.inner.name,
            key = ?entry.key(),
            topology = %topology_version,
            "[eviction manager]: Touching entry."
        );
        self.notify_policy(&plugins, entry);
    }

    /// Report an access to the cached entry of a transaction entry to the eviction policy.
    ///
    /// Non-local contributions to near caches are ignored.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::touch_tx"))]
    pub fn touch_tx(&self, tx_entry: &TxEntry<K, V>, local: bool) {
        let Some(_busy) = self.enter() else {
            return;
        };
        let Some(plugins) = self.enabled_plugins() else {
            return;
        };
        if !local && self.inner.mode.is_near() {
            return;
        }

        let entry = tx_entry.cached();
        if entry.is_detached() || entry.is_internal() {
            return;
        }

        self.cleanup(entry);

        if self.inner.statistics {
            self.inner.stats.on_touch();
        }
        self.inner.metrics.eviction_touch.increase(1);

        self.notify_policy(&plugins, entry);
    }

    fn cleanup(&self, entry: &Arc<CacheEntry<K, V>>) {
        if (entry.mark_obsolete_if_empty(None) || entry.is_obsolete()) && self.remove_from_table(entry) {
            self.inner.metrics.eviction_cleanup.increase(1);
            tracing::trace!(
                cache = %self.inner.name,
                key = ?entry.key(),
                "[eviction manager]: Removed obsolete entry."
            );
        }
    }

    fn notify_policy(&self, plugins: &Plugins<K, V>, entry: &CacheEntry<K, V>) {
        strict_assert!(!entry.is_internal(), "invalid entry for policy notification: {entry:?}");

        let Some(policy) = plugins.policy.as_ref() else {
            return;
        };

        tracing::trace!(
            cache = %self.inner.name,
            key = ?entry.key(),
            "[eviction manager]: Notifying eviction policy with entry."
        );

        let view = entry.view();
        if plugins.filter.as_ref().is_none_or(|filter| filter.evict_allowed(view)) {
            policy.on_entry_accessed(entry.is_obsolete_or_deleted(), view);
            if self.inner.statistics {
                self.inner.stats.on_policy_notify();
            }
            self.inner.metrics.eviction_policy_notify.increase(1);
        }
    }

    /// Evict the entries mapped to `keys` as one unit.
    ///
    /// Entries are locked in the order of `keys`. Batches of independent callers must present their keys in a
    /// consistent global order, otherwise they may deadlock against each other. Duplicated keys are ignored.
    ///
    /// The evicted entries are handed to the swap writer with a single call while all entries of the batch are locked.
    /// The locks are released in the reverse order of their acquisition before the evicted entries are removed from the
    /// entry table and reported.
    ///
    /// If the swap write fails, the error is returned after the locks have been released. The entries of the batch stay
    /// obsolete and are removed lazily by later touches.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::batch_evict"))]
    pub fn batch_evict(&self, keys: &[K], version_hint: Option<Version>) -> Result<()> {
        let Some(_busy) = self.enter() else {
            return Ok(());
        };

        let recordable = self.inner.event_recorder.is_recordable(Event::Evicted);
        let swap = self.inner.swap_writer.is_enabled();

        // Resolve all participating entries before locking any of them.
        let cached = keys
            .iter()
            .unique()
            .filter_map(|key| self.inner.table.peek(key))
            .collect_vec();

        let mut obsolete_version = version_hint;
        let mut locked = Vec::with_capacity(cached.len());
        let mut records = vec![];
        let mut evicted = vec![];
        let mut not_removable = 0usize;

        for entry in cached.iter() {
            if entry.is_internal() {
                continue;
            }

            locked.push(entry.lock());

            if entry.is_obsolete() {
                not_removable += 1;
                continue;
            }

            let version = *obsolete_version.get_or_insert_with(|| self.inner.versions.next());

            match entry.prepare_batch_swap(version) {
                Some(record) => {
                    strict_assert!(entry.is_obsolete(), "entry is not obsolete after batch swap: {entry:?}");
                    strict_assert_eq!(entry.version(), version, "batch version is not stamped: {entry:?}");
                    tracing::debug!(
                        cache = %self.inner.name,
                        key = ?entry.key(),
                        "[eviction manager]: Entry was evicted."
                    );
                    evicted.push((entry, Some(record.value.clone())));
                    if swap {
                        records.push(record);
                    }
                }
                None if entry.is_obsolete() => evicted.push((entry, None)),
                None => not_removable += 1,
            }
        }

        let written = records.len();
        let res = match records.is_empty() {
            true => Ok(()),
            false => {
                let now = Instant::now();
                let res = self.inner.swap_writer.write_all(records);
                self.inner
                    .metrics
                    .eviction_swap_write_duration
                    .record(now.elapsed().as_secs_f64());
                self.inner.metrics.eviction_swap_records.increase(written as _);
                res
            }
        };

        unlock_reversed(locked);

        if let Err(e) = res {
            tracing::error!(
                cache = %self.inner.name,
                records = written,
                "[eviction manager]: Failed to write evicted entries to swap, error: {e}"
            );
            return Err(Error::new(ErrorKind::SwapWrite, "batch write failed")
                .with_context("cache", &self.inner.name)
                .with_context("records", written)
                .with_source(e));
        }

        let plugins = self.enabled_plugins();
        for (entry, old_value) in evicted.iter() {
            entry.on_marked_obsolete();
            self.remove_from_table(entry);
            if let Some(plugins) = plugins.as_ref() {
                self.notify_policy(plugins, entry);
            }
            if recordable {
                self.inner.event_recorder.record_eviction(
                    entry.partition(),
                    entry.key(),
                    old_value.as_deref(),
                    old_value.is_some(),
                );
            }
        }

        if self.inner.statistics {
            self.inner.stats.on_batch_evict(evicted.len() as _);
        }
        self.inner.metrics.eviction_batch.increase(evicted.len() as _);
        self.inner
            .metrics
            .eviction_batch_not_removable
            .increase(not_removable as _);

        Ok(())
    }

    /// Acquire the shared topology lock and observe the topology version.
    ///
    /// Near caches and caches without a partition coordinator take no lock and observe [`TopologyVersion::ZERO`].
    pub fn lock_topology(&self) -> TopologyGuard<'_, K> {
        match self.inner.coordinator.as_deref() {
            Some(coordinator) if !self.inner.mode.is_near() => {
                coordinator.read_lock_topology();
                TopologyGuard {
                    coordinator: Some(coordinator),
                    version: coordinator.topology_version(),
                }
            }
            _ => TopologyGuard {
                coordinator: None,
                version: TopologyVersion::ZERO,
            },
        }
    }

    /// Release the shared topology lock.
    pub fn unlock_topology(&self, guard: TopologyGuard<'_, K>) {
        drop(guard);
    }

    /// Reserve and lock partition `partition` if it is moving.
    ///
    /// Returns `None` if no lock is needed: rebalancing is disabled, the cache is a near cache, the partition is not
    /// found locally, or the partition is not moving anymore once locked. In the last case the lock and the reservation
    /// are released before returning.
    pub fn lock_partition(&self, partition: PartitionId) -> Option<PartitionGuard<K>> {
        if !self.inner.rebalance || self.inner.mode.is_near() {
            return None;
        }
        let coordinator = self.inner.coordinator.as_ref()?;

        let p = match coordinator.local_partition(partition, TopologyVersion::NONE) {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(
                    cache = %self.inner.name,
                    partition,
                    "[eviction manager]: Partition does not belong to local node, error: {e}"
                );
                return None;
            }
        };

        if !p.reserve() {
            return None;
        }
        p.lock();
        if p.state() != PartitionState::Moving {
            p.unlock();
            p.release();
            return None;
        }

        tracing::trace!(partition, "[eviction manager]: lock partition");
        Some(PartitionGuard {
            partition: p,
            _not_send: PhantomData,
        })
    }

    /// Unlock and release a partition locked with [`EvictionManager::lock_partition`].
    pub fn unlock_partition(&self, guard: PartitionGuard<K>) {
        drop(guard);
    }

    /// Record the eviction of `key` at `version` from the locked partition for rebalancing.
    pub fn save_eviction_info(&self, guard: &PartitionGuard<K>, key: &K, version: Version) {
        strict_assert!(self.inner.rebalance, "save eviction info without rebalancing: {}", self.inner.name);
        strict_assert!(
            !self.inner.mode.is_near(),
            "failed to save eviction info of near cache: {}",
            self.inner.name
        );
        strict_assert!(
            guard.partition.is_locked_by_current_thread(),
            "partition {} is not locked",
            guard.partition.id()
        );
        guard.partition.on_entry_evicted(key.clone(), version);
    }

    /// Evict the entries requested by a remote node and respond with the rejected keys.
    ///
    /// Every entry is only evicted if its version still matches the version observed by the requesting node. Missing
    /// entries count as evicted. The response is delivered best-effort.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "atrium::memory::manager::process_eviction_request"))]
    pub fn process_eviction_request(&self, node: NodeId, request: EvictionRequest<K>) {
        let mut response = EvictionResponse::new(request.future_id);

        match self.enter() {
            Some(_busy) => {
                for (key, version) in request.entries {
                    let evicted = match self.inner.table.peek(&key) {
                        Some(entry) if entry.is_internal() => false,
                        Some(entry) => self.evict_unchanged(&EvictionInfo::new(entry, version)),
                        None => true,
                    };
                    if !evicted {
                        response.rejected.push(key);
                    }
                }
            }
            None => response.rejected = request.entries.into_iter().map(|(key, _)| key).collect(),
        }

        self.send_eviction_response(node, response);
    }

    fn send_eviction_response(&self, node: NodeId, response: EvictionResponse<K>) {
        let future_id = response.future_id;
        let rejected = response.rejected.len();
        match self.inner.response_sender.send(node, response) {
            Ok(()) => tracing::debug!(
                cache = %self.inner.name,
                %node,
                future_id,
                rejected,
                "[eviction manager]: Sent eviction response."
            ),
            Err(e) if e.kind() == ErrorKind::TopologyChanged => tracing::debug!(
                cache = %self.inner.name,
                %node,
                "[eviction manager]: Failed to send eviction response since initiating node left grid."
            ),
            Err(e) => tracing::error!(
                cache = %self.inner.name,
                %node,
                future_id,
                "[eviction manager]: Failed to send eviction response to node, error: {e}"
            ),
        }
    }

    /// Snapshot of the eviction statistics.
    ///
    /// Counters stay zero unless statistics are enabled.
    pub fn stats(&self) -> EvictionStats {
        self.inner.stats.snapshot()
    }

    /// Log the eviction statistics.
    pub fn print_stats(&self) {
        tracing::info!(
            cache = %self.inner.name,
            "[eviction manager]: Eviction stats: {}",
            self.stats()
        );
    }

    /// Log the memory related state of the manager.
    pub fn print_memory_stats(&self) {
        tracing::info!(
            cache = %self.inner.name,
            policy = self.is_policy_enabled(),
            in_flight = self.inner.busy.holders(),
            "[eviction manager]: Eviction manager memory stats."
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use parking_lot::Mutex as PlMutex;

    use super::*;
    use crate::{
        builder::EvictionManagerBuilder,
        partition::LocalTopology,
        record::Flags,
        table::ShardedEntryTable,
        test_utils::{RecordingEventRecorder, RecordingPolicy, RecordingSwapWriter},
    };

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<EvictionManager<u64, u64>>();
    }

    struct Harness {
        table: Arc<ShardedEntryTable<u64, u64>>,
        topology: Arc<LocalTopology<u64>>,
        policy: Arc<RecordingPolicy<u64, u64>>,
        swap: Arc<RecordingSwapWriter<u64, u64>>,
        events: Arc<RecordingEventRecorder<u64, u64>>,
        manager: EvictionManager<u64, u64>,
    }

    fn harness(mode: CacheMode, policy: bool) -> Harness {
        let table = Arc::new(ShardedEntryTable::<u64, u64>::new(4, 8));
        let topology = Arc::new(LocalTopology::<u64>::new());
        for p in 0..8 {
            topology.create_partition(p, PartitionState::Owning);
        }
        let recording_policy = Arc::new(RecordingPolicy::<u64, u64>::default());
        let swap = Arc::new(RecordingSwapWriter::<u64, u64>::default());
        let events = Arc::new(RecordingEventRecorder::<u64, u64>::default());
        let manager = EvictionManagerBuilder::<u64, u64>::new("test")
            .with_cache_mode(mode)
            .with_statistics(true)
            .with_entry_table(table.clone())
            .with_partition_coordinator(topology.clone())
            .with_swap_writer(swap.clone())
            .with_event_recorder(events.clone())
            .build()
            .unwrap();
        let p: Option<Arc<dyn EvictionPolicy<Key = u64, Value = u64>>> = match policy {
            true => Some(recording_policy.clone()),
            false => None,
        };
        manager.start(p, None).unwrap();
        Harness {
            table,
            topology,
            policy: recording_policy,
            swap,
            events,
            manager,
        }
    }

    impl Harness {
        fn insert(&self, key: u64) -> Arc<CacheEntry<u64, u64>> {
            self.table.insert(key, Some(key * 10), self.manager.inner.versions.next())
        }
    }

    #[test]
    fn test_start_twice_and_after_stop() {
        let h = harness(CacheMode::Partitioned, false);
        assert_eq!(h.manager.start(None, None).unwrap_err().kind(), ErrorKind::Config);
        h.manager.stop();
        assert!(h.manager.is_stopped());
        assert_eq!(h.manager.start(None, None).unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_evict_absent_and_internal() {
        let h = harness(CacheMode::Partitioned, true);
        assert!(h.manager.evict(None, None, true, None));

        let internal = Arc::new(CacheEntry::new(1u64, Some(1u64), Version::new(1), 0).with_flags(Flags::INTERNAL));
        h.table.insert_entry(internal.clone());
        assert!(!h.manager.evict(Some(&internal), None, true, None));
        assert!(!h.manager.evict_if_unchanged(EvictionInfo::new(internal.clone(), Version::new(1))));
        h.manager.batch_evict(&[1], None).unwrap();
        assert!(!internal.is_obsolete());
        assert!(h.table.peek(&1).is_some());
    }

    #[test_log::test]
    fn test_explicit_evict_notifies_policy() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);

        assert!(h.manager.evict(Some(&e), None, true, None));
        assert!(e.is_obsolete());
        assert!(h.table.peek(&1).is_none());
        assert_eq!(h.policy.accesses(), vec![(1, true)]);
        assert_eq!(h.events.evictions(), vec![(e.partition(), 1, Some(10), true)]);
        assert_eq!(h.manager.stats().evictions, 1);
        // Not a capacity eviction.
        assert!(!h.manager.inner.first_evict_warned.load(Ordering::Relaxed));

        // Evicted once.
        assert!(!h.manager.evict(Some(&e), None, true, None));
    }

    #[test_log::test]
    fn test_policy_evict_does_not_notify_policy() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);

        assert!(h.manager.evict(Some(&e), None, false, None));
        assert!(h.policy.accesses().is_empty());
        assert!(h.manager.inner.first_evict_warned.load(Ordering::Relaxed));
    }

    #[test]
    fn test_evict_filter_veto() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);

        assert!(!h.manager.evict(Some(&e), None, true, Some(&|_| false)));
        assert!(!e.is_obsolete());
        assert!(h.events.evictions().is_empty());
        assert!(h.manager.evict(Some(&e), None, true, Some(&|view| view.value().as_deref() == Some(&10))));
    }

    #[test]
    fn test_evict_if_unchanged_stale_version() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);
        let observed = e.version();
        assert!(e.update(Some(11), h.manager.inner.versions.next()));

        assert!(!h.manager.evict_if_unchanged(EvictionInfo::new(e.clone(), observed)));
        assert!(!e.is_obsolete());
        assert!(h.table.peek(&1).is_some());

        assert!(h.manager.evict_if_unchanged(EvictionInfo::new(e.clone(), e.version())));
        assert!(e.is_obsolete());
    }

    #[test]
    fn test_evict_if_unchanged_with_filter() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);

        let info = EvictionInfo::new(e.clone(), e.version()).with_filter(Arc::new(|_: EntryView<'_, u64, u64>| false));
        assert!(!h.manager.evict_if_unchanged(info));
        assert!(!e.is_obsolete());
    }

    #[test]
    fn test_evict_from_moving_partition_saves_info() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);
        let partition = h.topology.local_partition(e.partition(), TopologyVersion::NONE).unwrap().unwrap();
        h.topology.move_partition(e.partition());

        let version = e.version();
        assert!(h.manager.evict_if_unchanged(EvictionInfo::new(e.clone(), version)));
        assert_eq!(partition.drain_eviction_history(), vec![(1, version)]);
        assert_eq!(partition.reservations(), 0);
        assert!(!partition.is_locked_by_current_thread());
    }

    #[test]
    fn test_lock_partition() {
        let h = harness(CacheMode::Partitioned, true);
        let owning = h.topology.local_partition(0, TopologyVersion::NONE).unwrap().unwrap();

        // Owning partitions need no lock, the reservation is released.
        assert!(h.manager.lock_partition(0).is_none());
        assert_eq!(owning.reservations(), 0);
        assert!(!owning.is_locked_by_current_thread());

        // Unknown partitions.
        assert!(h.manager.lock_partition(100).is_none());

        // Partitions that belong to other nodes.
        h.topology.rent_partition(1);
        assert!(h.manager.lock_partition(1).is_none());

        h.topology.move_partition(2);
        let moving = h.topology.local_partition(2, TopologyVersion::NONE).unwrap().unwrap();
        let guard = h.manager.lock_partition(2).unwrap();
        assert_eq!(moving.reservations(), 1);
        assert!(moving.is_locked_by_current_thread());
        h.manager.save_eviction_info(&guard, &42, Version::new(7));
        h.manager.unlock_partition(guard);
        assert_eq!(moving.reservations(), 0);
        assert!(!moving.is_locked_by_current_thread());
        assert_eq!(moving.drain_eviction_history(), vec![(42, Version::new(7))]);

        // Rebalancing finished.
        assert!(h.topology.own(2));
        assert!(h.manager.lock_partition(2).is_none());
        assert_eq!(moving.reservations(), 0);
    }

    #[test]
    fn test_near_cache_skips_partitions() {
        let h = harness(CacheMode::Near, true);
        h.topology.move_partition(0);
        assert!(h.manager.lock_partition(0).is_none());
        let topology = h.manager.lock_topology();
        assert_eq!(topology.version(), TopologyVersion::ZERO);
        h.manager.unlock_topology(topology);

        // Near caches never warn.
        let e = h.insert(1);
        assert!(h.manager.evict(Some(&e), None, false, None));
        assert!(!h.manager.inner.first_evict_warned.load(Ordering::Relaxed));
    }

    #[test]
    fn test_lock_topology() {
        let h = harness(CacheMode::Partitioned, true);
        let version = h.topology.bump_version();
        let guard = h.manager.lock_topology();
        assert_eq!(guard.version(), version);
        drop(guard);
        // The topology is writable again.
        assert_eq!(h.topology.bump_version(), TopologyVersion(version.0 + 1));
    }

    #[test]
    fn test_touch_notifies_policy_and_cleans_up() {
        let h = harness(CacheMode::Partitioned, true);
        let e1 = h.insert(1);
        let e2 = h.insert(2);
        assert!(e2.update(None, Version::new(100)));

        h.manager.touch(&e1, TopologyVersion::NONE);
        h.manager.touch(&e2, TopologyVersion::NONE);

        assert!(h.table.peek(&1).is_some());
        assert!(h.table.peek(&2).is_none());
        assert!(e2.is_obsolete());
        assert_eq!(h.policy.accesses(), vec![(1, false), (2, true)]);
        assert_eq!(h.manager.stats().touches, 2);
        assert_eq!(h.manager.stats().policy_notifications, 2);
    }

    #[test]
    fn test_touch_skips_detached_and_internal() {
        let h = harness(CacheMode::Partitioned, true);
        let detached = Arc::new(CacheEntry::new(1u64, None, Version::new(1), 0).with_flags(Flags::DETACHED));
        let internal = Arc::new(CacheEntry::new(2u64, None, Version::new(1), 0).with_flags(Flags::INTERNAL));
        h.manager.touch(&detached, TopologyVersion::NONE);
        h.manager.touch(&internal, TopologyVersion::NONE);
        assert!(!detached.is_obsolete());
        assert!(!internal.is_obsolete());
        assert!(h.policy.accesses().is_empty());
    }

    #[test]
    fn test_touch_skips_entry_detached_later() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);
        e.set_flags(Flags::DETACHED, true);
        h.manager.touch(&e, TopologyVersion::NONE);
        assert!(h.policy.accesses().is_empty());

        e.set_flags(Flags::DETACHED, false);
        h.manager.touch(&e, TopologyVersion::NONE);
        assert_eq!(h.policy.accesses(), vec![(1, false)]);
    }

    #[test_log::test]
    fn test_evicted_value_is_read_under_entry_lock() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);

        let guard = e.lock();
        thread::scope(|s| {
            let handle = s.spawn(|| h.manager.evict(Some(&e), None, true, None));
            // Let the eviction block on the entry lock.
            thread::sleep(std::time::Duration::from_millis(50));
            assert!(e.update(Some(11), h.manager.inner.versions.next()));
            drop(guard);
            assert!(handle.join().unwrap());
        });

        assert_eq!(h.events.evictions(), vec![(e.partition(), 1, Some(11), true)]);
    }

    #[test_log::test]
    fn test_print_stats() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);
        h.manager.touch(&e, TopologyVersion::NONE);
        assert!(h.manager.evict(Some(&e), None, true, None));
        h.manager.print_stats();
        h.manager.print_memory_stats();
        assert_eq!(
            h.manager.stats().to_string(),
            "evictions: 1, batch evictions: 0, touches: 1, policy notifications: 2"
        );
    }

    #[test]
    fn test_touch_without_policy_still_cleans_up() {
        let h = harness(CacheMode::Partitioned, false);
        let e = h.insert(1);
        assert!(e.update(None, Version::new(100)));
        h.manager.touch(&e, TopologyVersion::NONE);
        assert!(h.table.peek(&1).is_none());
        assert!(h.policy.accesses().is_empty());

        let e = h.insert(2);
        assert!(h.manager.evict(Some(&e), None, true, None));
        assert!(h.policy.accesses().is_empty());
    }

    #[test]
    fn test_touch_filter_veto() {
        struct OddOnly;
        impl EvictionFilter for OddOnly {
            type Key = u64;
            type Value = u64;
            fn evict_allowed(&self, entry: EntryView<'_, u64, u64>) -> bool {
                entry.key() % 2 == 1
            }
        }

        let table = Arc::new(ShardedEntryTable::<u64, u64>::new(1, 1));
        let policy = Arc::new(RecordingPolicy::<u64, u64>::default());
        let manager = EvictionManagerBuilder::<u64, u64>::new("test")
            .with_rebalance(false)
            .with_entry_table(table.clone())
            .build()
            .unwrap();
        manager.start(Some(policy.clone()), Some(Arc::new(OddOnly))).unwrap();

        for key in 1..=4 {
            let e = table.insert(key, Some(key), Version::new(1));
            manager.touch(&e, TopologyVersion::NONE);
        }
        assert_eq!(policy.accesses(), vec![(1, false), (3, false)]);
    }

    #[test]
    fn test_touch_tx() {
        let h = harness(CacheMode::Near, true);
        let e = h.insert(1);
        let tx = TxEntry::new(e.clone());

        h.manager.touch_tx(&tx, false);
        assert!(h.policy.accesses().is_empty());
        h.manager.touch_tx(&tx, true);
        assert_eq!(h.policy.accesses(), vec![(1, false)]);

        let h = harness(CacheMode::Partitioned, false);
        let e = h.insert(1);
        assert!(e.update(None, Version::new(100)));
        // Disabled policy skips the transaction touch entirely.
        h.manager.touch_tx(&TxEntry::new(e.clone()), true);
        assert!(!e.is_obsolete());
    }

    #[test]
    fn test_touch_reports_removal_failure_and_notifies() {
        struct FailingTable(ShardedEntryTable<u64, u64>);
        impl EntryTable<u64, u64> for FailingTable {
            fn peek(&self, key: &u64) -> Option<Arc<CacheEntry<u64, u64>>> {
                self.0.peek(key)
            }
            fn remove_entry(&self, _: &Arc<CacheEntry<u64, u64>>) -> Result<bool> {
                Err(Error::new(ErrorKind::External, "table is read-only"))
            }
        }

        let table = Arc::new(FailingTable(ShardedEntryTable::new(1, 1)));
        let policy = Arc::new(RecordingPolicy::<u64, u64>::default());
        let manager = EvictionManagerBuilder::<u64, u64>::new("test")
            .with_cache_mode(CacheMode::Local)
            .with_entry_table(table.clone())
            .build()
            .unwrap();
        manager.start(Some(policy.clone()), None).unwrap();

        let e = table.0.insert(1, None, Version::new(1));
        manager.touch(&e, TopologyVersion::NONE);
        assert!(e.is_obsolete());
        assert_eq!(policy.accesses(), vec![(1, true)]);
    }

    #[test]
    fn test_operations_after_stop_are_noops() {
        let h = harness(CacheMode::Partitioned, true);
        let e = h.insert(1);
        h.manager.stop();

        assert!(!h.manager.evict(Some(&e), None, true, None));
        assert!(!h.manager.evict_if_unchanged(EvictionInfo::new(e.clone(), e.version())));
        h.manager.batch_evict(&[1], None).unwrap();
        h.manager.touch(&e, TopologyVersion::NONE);
        assert!(!e.is_obsolete());
        assert!(h.policy.accesses().is_empty());
        assert!(h.swap.batches().is_empty());
    }

    #[test]
    fn test_operations_before_start_skip_policy() {
        let table = Arc::new(ShardedEntryTable::<u64, u64>::new(1, 1));
        let manager = EvictionManagerBuilder::<u64, u64>::new("test")
            .with_rebalance(false)
            .with_entry_table(table.clone())
            .build()
            .unwrap();
        assert!(!manager.is_started());
        assert!(!manager.is_policy_enabled());

        let e = table.insert(1, Some(1), Version::new(1));
        assert!(manager.evict(Some(&e), None, true, None));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unlock_reversed() {
        struct Tracked<'a> {
            id: usize,
            log: &'a PlMutex<Vec<usize>>,
        }
        impl Drop for Tracked<'_> {
            fn drop(&mut self) {
                self.log.lock().push(self.id);
            }
        }

        let log = PlMutex::new(vec![]);
        let guards = (1..=3).map(|id| Tracked { id, log: &log }).collect_vec();
        unlock_reversed(guards);
        assert_eq!(*log.lock(), vec![3, 2, 1]);
    }

    #[test_log::test]
    fn test_batch_evict() {
        let h = harness(CacheMode::Partitioned, true);
        let entries = (1..=3).map(|key| h.insert(key)).collect_vec();

        h.manager.batch_evict(&[1, 2, 2, 3, 4], Some(Version::new(1000))).unwrap();

        for e in entries.iter() {
            assert!(e.is_obsolete());
            assert!(!e.has_value());
            assert_eq!(e.version(), Version::new(1000));
        }
        assert!(h.table.is_empty());

        let batches = h.swap.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].iter().map(|(k, _, _)| *k).collect_vec(), vec![1, 2, 3]);
        assert_eq!(batches[0].iter().map(|(_, v, _)| **v).collect_vec(), vec![10, 20, 30]);

        assert_eq!(h.policy.accesses(), vec![(1, true), (2, true), (3, true)]);
        assert_eq!(h.events.evictions().len(), 3);
        assert_eq!(h.manager.stats().batch_evictions, 3);
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<PlMutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Keys of the entry lock events with the given message, in emission order.
    fn entry_lock_events(output: &str, message: &str) -> Vec<u64> {
        output
            .lines()
            .filter(|line| line.contains(message))
            .filter_map(|line| line.rsplit("key=").next())
            .map(|key| key.trim().parse().unwrap())
            .collect_vec()
    }

    #[test]
    fn test_batch_evict_unlocks_in_reverse_order() {
        let h = harness(CacheMode::Partitioned, true);
        for key in 1..=3 {
            h.insert(key);
        }

        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_writer({
                let capture = capture.clone();
                move || capture.clone()
            })
            .finish();
        tracing::subscriber::with_default(subscriber, || h.manager.batch_evict(&[1, 2, 3], None)).unwrap();

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        assert_eq!(entry_lock_events(&output, "Lock entry."), vec![1, 2, 3]);
        assert_eq!(entry_lock_events(&output, "Unlock entry."), vec![3, 2, 1]);
        assert_eq!(h.swap.batches().len(), 1);
    }

    #[test]
    fn test_batch_evict_skips_pinned_entries() {
        let h = harness(CacheMode::Partitioned, true);
        let e1 = h.insert(1);
        let e2 = h.insert(2);
        e2.pin();

        h.manager.batch_evict(&[1, 2], None).unwrap();
        assert!(e1.is_obsolete());
        assert!(!e2.is_obsolete());
        assert!(h.table.peek(&2).is_some());
        assert_eq!(h.swap.batches()[0].len(), 1);
    }

    #[test]
    fn test_batch_evict_swap_failure() {
        let h = harness(CacheMode::Partitioned, true);
        let entries = (1..=2).map(|key| h.insert(key)).collect_vec();
        h.swap.fail_next();

        let err = h.manager.batch_evict(&[1, 2], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapWrite);

        // Locks are released, entries are obsolete but not finalized.
        for e in entries.iter() {
            assert!(e.is_obsolete());
            assert!(e.has_value());
            thread::scope(|s| s.spawn(|| drop(e.lock())).join().unwrap());
        }
        assert_eq!(h.table.len(), 2);
        assert!(h.policy.accesses().is_empty());

        // Lazy cleanup.
        for e in entries.iter() {
            h.manager.touch(e, TopologyVersion::NONE);
        }
        assert!(h.table.is_empty());
    }

    #[test]
    fn test_process_eviction_request() {
        let table = Arc::new(ShardedEntryTable::<u64, u64>::new(1, 1));
        let sender = Arc::new(crate::test_utils::RecordingResponseSender::<u64>::default());
        let manager = EvictionManagerBuilder::<u64, u64>::new("test")
            .with_rebalance(false)
            .with_entry_table(table.clone())
            .with_response_sender(sender.clone())
            .build()
            .unwrap();
        manager.start(None, None).unwrap();

        let e1 = table.insert(1, Some(1), Version::new(1));
        let e2 = table.insert(2, Some(2), Version::new(5));
        let request = EvictionRequest {
            future_id: 7,
            entries: vec![(1, e1.version()), (2, Version::new(4)), (3, Version::new(1))],
        };
        manager.process_eviction_request(NodeId(2), request.clone());

        assert!(e1.is_obsolete());
        assert!(!e2.is_obsolete());
        assert_eq!(
            sender.responses(),
            vec![(
                NodeId(2),
                EvictionResponse {
                    future_id: 7,
                    rejected: vec![2],
                }
            )]
        );

        // Delivery failures are swallowed.
        sender.fail_next(ErrorKind::TopologyChanged);
        manager.process_eviction_request(NodeId(3), request.clone());
        sender.fail_next(ErrorKind::Io);
        manager.process_eviction_request(NodeId(3), request);
        assert_eq!(sender.responses().len(), 1);
    }

    #[test]
    fn test_concurrent_evict_single_winner() {
        let h = harness(CacheMode::Partitioned, true);
        for key in 0..32 {
            let e = h.insert(key);
            let version = e.version();
            let barrier = Barrier::new(4);
            let winners = thread::scope(|s| {
                let handles = (0..4)
                    .map(|i| {
                        let (e, barrier, manager) = (&e, &barrier, &h.manager);
                        s.spawn(move || {
                            barrier.wait();
                            match i % 2 {
                                0 => manager.evict_if_unchanged(EvictionInfo::new(e.clone(), version)),
                                _ => manager.evict(Some(e), None, true, None),
                            }
                        })
                    })
                    .collect_vec();
                handles.into_iter().map(|handle| handle.join().unwrap()).filter(|w| *w).count()
            });
            assert_eq!(winners, 1);
        }
        assert!(h.table.is_empty());
    }
}
