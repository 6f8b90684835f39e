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
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwapOption;
use atrium_common::{
    code::{Key, Value},
    strict_assert,
};
use bitflags::bitflags;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::{partition::PartitionId, swap::SwapRecord, version::Version};

bitflags! {
    /// Immutable-ish attributes of a cache entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        /// Metadata or system entry. Never eligible for eviction.
        const INTERNAL = 0b00000001;
        /// The entry is not mapped by any entry table (e.g. a transaction-local copy).
        const DETACHED = 0b00000010;
    }
}

const OBSOLETE: u64 = 1 << 63;

/// State word of an entry: the version in the low 63 bits and the obsolete flag in the highest bit.
///
/// Packing both in one word makes the `live -> obsolete` transition a single compare-and-swap against the version
/// observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State(u64);

impl State {
    fn live(version: Version) -> Self {
        Self(version.raw())
    }

    fn obsolete(version: Version) -> Self {
        Self(version.raw() | OBSOLETE)
    }

    fn version(self) -> Version {
        Version::new(self.0 & !OBSOLETE)
    }

    fn is_obsolete(self) -> bool {
        self.0 & OBSOLETE != 0
    }
}

/// A single key/value/version slot of the in-memory cache.
///
/// The entry table owns the entries; the eviction manager only holds transient references during an operation.
///
/// Every mutating transition runs under the reentrant per-entry lock and commits with a compare-and-swap of the state
/// word against the state observed at the beginning of the transition. Reads of the version and the obsolete flag are
/// lock-free.
pub struct CacheEntry<K, V> {
    key: K,
    partition: PartitionId,

    state: AtomicU64,
    value: ArcSwapOption<V>,
    flags: AtomicU64,
    pins: AtomicUsize,

    lock: ReentrantMutex<()>,
}

impl<K, V> Debug for CacheEntry<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.load_state();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("partition", &self.partition)
            .field("version", &state.version())
            .field("obsolete", &state.is_obsolete())
            .field("flags", &Flags::from_bits_truncate(self.flags.load(Ordering::Relaxed)))
            .field("pins", &self.pins.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> CacheEntry<K, V> {
    fn load_state(&self) -> State {
        State(self.state.load(Ordering::Acquire))
    }

    fn commit(&self, current: State, next: State) -> bool {
        self.state
            .compare_exchange(current.0, next.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<K, V> CacheEntry<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a live entry.
    pub fn new(key: K, value: Option<V>, version: Version, partition: PartitionId) -> Self {
        Self {
            key,
            partition,
            state: AtomicU64::new(State::live(version).0),
            value: ArcSwapOption::new(value.map(Arc::new)),
            flags: AtomicU64::new(0),
            pins: AtomicUsize::new(0),
            lock: ReentrantMutex::new(()),
        }
    }

    /// Set flags on a freshly created entry.
    pub fn with_flags(self, flags: Flags) -> Self {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
        self
    }

    /// Key of the entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Partition the key is routed to.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Current version of the entry.
    pub fn version(&self) -> Version {
        self.load_state().version()
    }

    /// Returns `true` if the entry holds a value.
    pub fn has_value(&self) -> bool {
        self.value.load().is_some()
    }

    /// Snapshot of the value, `None` for tombstones and released entries.
    pub fn raw_value(&self) -> Option<Arc<V>> {
        self.value.load_full()
    }

    /// Returns `true` once the entry has been marked obsolete. The flag is terminal.
    pub fn is_obsolete(&self) -> bool {
        self.load_state().is_obsolete()
    }

    /// Returns `true` if the entry is obsolete or holds no value.
    pub fn is_obsolete_or_deleted(&self) -> bool {
        self.is_obsolete() || !self.has_value()
    }

    /// Returns `true` for metadata/system entries.
    pub fn is_internal(&self) -> bool {
        self.flags().contains(Flags::INTERNAL)
    }

    /// Returns `true` if the entry is not mapped by the entry table.
    pub fn is_detached(&self) -> bool {
        self.flags().contains(Flags::DETACHED)
    }

    /// Get the entry flags.
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Set or clear the given flags.
    pub fn set_flags(&self, flags: Flags, val: bool) {
        match val {
            true => self.flags.fetch_or(flags.bits(), Ordering::Release),
            false => self.flags.fetch_and(!flags.bits(), Ordering::Release),
        };
    }

    /// Read-only view of the entry for policies and filters.
    pub fn view(&self) -> EntryView<'_, K, V> {
        EntryView { entry: self }
    }

    /// Acquire the per-entry lock.
    ///
    /// The lock is reentrant: transitions called while holding the guard acquire it again without blocking.
    pub fn lock(&self) -> EntryGuard<'_, K, V> {
        let guard = self.lock.lock();
        tracing::trace!(key = ?self.key, "[entry]: Lock entry.");
        EntryGuard {
            entry: self,
            _guard: guard,
        }
    }

    /// Pin the entry on behalf of an active transaction lock. Pinned entries are never evicted.
    ///
    /// Returns the pin count after the op.
    pub fn pin(&self) -> usize {
        self.pins.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release a pin taken with [`CacheEntry::pin`].
    ///
    /// Returns the pin count after the op.
    pub fn unpin(&self) -> usize {
        let old = self.pins.fetch_sub(1, Ordering::AcqRel);
        strict_assert!(old > 0, "unpin an entry that is not pinned: {:?}", self.key);
        old - 1
    }

    /// Returns `true` while the entry is pinned.
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Replace the value and bump the version.
    ///
    /// Returns `false` if the entry is already obsolete; the caller is supposed to create a new entry then.
    pub fn update(&self, value: Option<V>, version: Version) -> bool {
        let _guard = self.lock.lock();
        let current = self.load_state();
        if current.is_obsolete() {
            return false;
        }
        strict_assert!(
            version >= current.version(),
            "version goes backwards: {} => {}",
            current.version(),
            version
        );
        self.value.store(value.map(Arc::new));
        self.commit(current, State::live(version))
    }

    /// Mark the entry obsolete if it holds no value.
    ///
    /// `obsolete_version` is stamped on the entry; `None` keeps the current version.
    pub fn mark_obsolete_if_empty(&self, obsolete_version: Option<Version>) -> bool {
        let _guard = self.lock.lock();
        let current = self.load_state();
        if current.is_obsolete() || self.has_value() || self.is_pinned() {
            return false;
        }
        let version = obsolete_version.unwrap_or(current.version());
        self.commit(current, State::obsolete(version))
    }

    /// Atomically evict the entry if `filter` admits it.
    ///
    /// The filter is evaluated against the state observed at the beginning of the transition, and the transition only
    /// commits if that state is still current. On success the value is released and the entry is obsolete with
    /// `obsolete_version`.
    pub fn evict_if<F>(&self, filter: F, obsolete_version: Version) -> bool
    where
        F: FnOnce(EntryView<'_, K, V>) -> bool,
    {
        let _guard = self.lock.lock();
        let current = self.load_state();
        if current.is_obsolete() || self.is_pinned() {
            return false;
        }
        if !filter(self.view()) {
            return false;
        }
        if !self.commit(current, State::obsolete(obsolete_version)) {
            return false;
        }
        self.value.store(None);
        true
    }

    /// Mark the entry obsolete as part of a batch eviction and produce the record to swap.
    ///
    /// Returns `None` if the transition did not happen (the entry stays live) or if the entry has no value to swap (the
    /// entry is obsolete then). Callers tell the two apart with [`CacheEntry::is_obsolete`].
    ///
    /// The value is kept until [`CacheEntry::on_marked_obsolete`] is called, so the eviction can still be reported.
    pub fn prepare_batch_swap(&self, obsolete_version: Version) -> Option<SwapRecord<K, V>> {
        let _guard = self.lock.lock();
        let current = self.load_state();
        if current.is_obsolete() || self.is_pinned() {
            return None;
        }
        let value = self.value.load_full();
        if !self.commit(current, State::obsolete(obsolete_version)) {
            return None;
        }
        value.map(|value| SwapRecord {
            key: self.key.clone(),
            version: current.version(),
            partition: self.partition,
            value,
        })
    }

    /// Finalize an obsolete entry by releasing its value.
    pub fn on_marked_obsolete(&self) {
        strict_assert!(self.is_obsolete(), "finalize a live entry: {:?}", self.key);
        self.value.store(None);
    }
}

/// Scoped holder of the per-entry lock. The lock is released on drop.
#[must_use = "the entry is unlocked as soon as the guard is dropped"]
pub struct EntryGuard<'a, K: Debug, V> {
    entry: &'a CacheEntry<K, V>,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl<K: Debug, V> Debug for EntryGuard<'_, K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryGuard").field("key", &self.entry.key).finish()
    }
}

impl<K: Debug, V> Drop for EntryGuard<'_, K, V> {
    fn drop(&mut self) {
        tracing::trace!(key = ?self.entry.key, "[entry]: Unlock entry.");
    }
}

impl<'a, K: Debug, V> EntryGuard<'a, K, V> {
    /// The locked entry.
    pub fn entry(&self) -> &'a CacheEntry<K, V> {
        self.entry
    }
}

/// Read-only view of a cache entry handed to policies and filters.
///
/// The view borrows the entry, so it cannot be retained beyond the notification.
pub struct EntryView<'a, K, V> {
    entry: &'a CacheEntry<K, V>,
}

impl<K, V> Clone for EntryView<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for EntryView<'_, K, V> {}

impl<K, V> Debug for EntryView<'_, K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryView").field("key", &self.entry.key).finish()
    }
}

impl<'a, K, V> EntryView<'a, K, V>
where
    K: Key,
    V: Value,
{
    /// Key of the entry.
    pub fn key(&self) -> &'a K {
        &self.entry.key
    }

    /// Value snapshot of the entry.
    pub fn value(&self) -> Option<Arc<V>> {
        self.entry.raw_value()
    }

    /// Current version of the entry.
    pub fn version(&self) -> Version {
        self.entry.version()
    }

    /// Partition of the entry.
    pub fn partition(&self) -> PartitionId {
        self.entry.partition
    }

    /// Obsolete flag of the entry.
    pub fn is_obsolete(&self) -> bool {
        self.entry.is_obsolete()
    }
}

/// Transaction entry wrapping the cached entry it was enlisted with.
#[derive(Debug)]
pub struct TxEntry<K, V> {
    cached: Arc<CacheEntry<K, V>>,
}

impl<K, V> TxEntry<K, V> {
    /// Wrap a cached entry.
    pub fn new(cached: Arc<CacheEntry<K, V>>) -> Self {
        Self { cached }
    }

    /// The cached entry of the transaction entry.
    pub fn cached(&self) -> &Arc<CacheEntry<K, V>> {
        &self.cached
    }
}
