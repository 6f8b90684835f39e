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
    collections::HashMap,
    fmt::{Debug, Display},
    mem,
    sync::{
        atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use atrium_common::{
    error::{Error, Result},
    strict_assert,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::version::{TopologyVersion, Version};

/// Identifier of a partition of the keyspace.
pub type PartitionId = u32;

/// Migration state of a local partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PartitionState {
    /// The partition is being rebalanced to the local node.
    Moving = 0,
    /// The local node owns the partition.
    Owning = 1,
    /// The partition is being handed over to another node.
    Renting = 2,
    /// The partition has been removed from the local node.
    Evicted = 3,
    /// All owners of the partition have left.
    Lost = 4,
}

impl PartitionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Moving,
            1 => Self::Owning,
            2 => Self::Renting,
            3 => Self::Evicted,
            _ => Self::Lost,
        }
    }

    /// Returns `true` if the partition may still be reserved in this state.
    pub fn is_reservable(self) -> bool {
        !matches!(self, Self::Renting | Self::Evicted)
    }
}

impl Display for PartitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Moving => "moving",
            Self::Owning => "owning",
            Self::Renting => "renting",
            Self::Evicted => "evicted",
            Self::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// A local partition.
///
/// The partition lock guards state transitions against concurrent eviction bookkeeping. It is reentrant and is held
/// across calls, so it is exposed as a raw `lock`/`unlock` pair. Use the scoped guards of the eviction manager instead
/// of pairing the calls manually.
pub struct Partition<K> {
    id: PartitionId,
    state: AtomicU8,
    reservations: AtomicUsize,
    lock: ReentrantMutex<()>,
    evictions: Mutex<Vec<(K, Version)>>,
}

impl<K> Debug for Partition<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("reservations", &self.reservations())
            .finish()
    }
}

impl<K> Partition<K> {
    /// Create a partition with the given state.
    pub fn new(id: PartitionId, state: PartitionState) -> Self {
        Self {
            id,
            state: AtomicU8::new(state as u8),
            reservations: AtomicUsize::new(0),
            lock: ReentrantMutex::new(()),
            evictions: Mutex::new(vec![]),
        }
    }

    /// Partition id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> PartitionState {
        PartitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition the partition state.
    ///
    /// The transition waits for the partition lock, so it never races with eviction bookkeeping.
    pub fn set_state(&self, state: PartitionState) {
        let _guard = self.lock.lock();
        self.state.store(state as u8, Ordering::Release);
    }

    /// Take a reservation that prevents the partition from being destroyed.
    ///
    /// Returns `false` if the partition is renting or evicted.
    pub fn reserve(&self) -> bool {
        if !self.state().is_reservable() {
            return false;
        }
        self.reservations.fetch_add(1, Ordering::AcqRel);
        if !self.state().is_reservable() {
            self.release();
            return false;
        }
        true
    }

    /// Release a reservation taken with [`Partition::reserve`].
    pub fn release(&self) {
        let old = self.reservations.fetch_sub(1, Ordering::AcqRel);
        strict_assert!(old > 0, "release an unreserved partition: {}", self.id);
    }

    /// Count of active reservations.
    pub fn reservations(&self) -> usize {
        self.reservations.load(Ordering::Acquire)
    }

    /// Acquire the partition lock and keep it until [`Partition::unlock`] is called on the same thread.
    pub fn lock(&self) {
        mem::forget(self.lock.lock());
    }

    /// Release the partition lock acquired with [`Partition::lock`].
    ///
    /// Calling it from a thread that does not hold the lock is a no-op.
    pub fn unlock(&self) {
        if !self.lock.is_owned_by_current_thread() {
            strict_assert!(false, "unlock partition {} not held by the current thread", self.id);
            return;
        }
        // SAFETY: The current thread holds the lock and the guard of the paired `lock` call was forgotten.
        unsafe { self.lock.force_unlock() };
    }

    /// Returns `true` if the current thread holds the partition lock.
    pub fn is_locked_by_current_thread(&self) -> bool {
        self.lock.is_owned_by_current_thread()
    }

    /// Record an evicted entry for rebalancing.
    ///
    /// Only moving partitions keep the history, evictions from other partitions are not relevant to rebalancing.
    pub fn on_entry_evicted(&self, key: K, version: Version) {
        if self.state() == PartitionState::Moving {
            self.evictions.lock().push((key, version));
        }
    }

    /// Take the recorded eviction history.
    pub fn drain_eviction_history(&self) -> Vec<(K, Version)> {
        mem::take(&mut *self.evictions.lock())
    }
}

/// Partition map and topology lock of the local node.
pub trait PartitionCoordinator<K>: Send + Sync + 'static {
    /// Look up a local partition.
    ///
    /// Returns `Ok(None)` if the partition is unknown, and an [`ErrorKind::InvalidPartition`] error if the partition
    /// exists but does not belong to the local node anymore.
    ///
    /// [`ErrorKind::InvalidPartition`]: atrium_common::error::ErrorKind::InvalidPartition
    fn local_partition(&self, id: PartitionId, topology_version: TopologyVersion) -> Result<Option<Arc<Partition<K>>>>;

    /// Acquire the shared topology lock.
    fn read_lock_topology(&self);

    /// Release the shared topology lock.
    fn read_unlock_topology(&self);

    /// Current topology version.
    fn topology_version(&self) -> TopologyVersion;
}

/// An in-process [`PartitionCoordinator`].
pub struct LocalTopology<K> {
    partitions: RwLock<HashMap<PartitionId, Arc<Partition<K>>>>,
    version: AtomicU64,
}

impl<K> Debug for LocalTopology<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTopology")
            .field("partitions", &self.partitions.read_recursive().len())
            .field("version", &self.version.load(Ordering::Acquire))
            .finish()
    }
}

impl<K> Default for LocalTopology<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LocalTopology<K> {
    /// Create an empty topology with version 1.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            version: AtomicU64::new(1),
        }
    }

    /// Create or replace a local partition.
    pub fn create_partition(&self, id: PartitionId, state: PartitionState) -> Arc<Partition<K>> {
        let partition = Arc::new(Partition::new(id, state));
        self.partitions.write().insert(id, partition.clone());
        partition
    }

    /// Mark a partition as owned by the local node.
    pub fn own(&self, id: PartitionId) -> bool {
        self.transition(id, PartitionState::Owning)
    }

    /// Mark a partition as being rebalanced to the local node.
    pub fn move_partition(&self, id: PartitionId) -> bool {
        self.transition(id, PartitionState::Moving)
    }

    /// Mark a partition as being handed over to another node.
    pub fn rent_partition(&self, id: PartitionId) -> bool {
        self.transition(id, PartitionState::Renting)
    }

    /// Remove a partition that migrated away.
    pub fn remove_partition(&self, id: PartitionId) -> Option<Arc<Partition<K>>> {
        let partition = self.partitions.write().remove(&id)?;
        partition.set_state(PartitionState::Evicted);
        Some(partition)
    }

    /// Advance the topology version.
    ///
    /// Waits for all topology readers.
    pub fn bump_version(&self) -> TopologyVersion {
        let _guard = self.partitions.write();
        TopologyVersion(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn transition(&self, id: PartitionId, state: PartitionState) -> bool {
        match self.partitions.read_recursive().get(&id) {
            Some(partition) => {
                partition.set_state(state);
                true
            }
            None => false,
        }
    }
}

impl<K> PartitionCoordinator<K> for LocalTopology<K>
where
    K: Send + Sync + 'static,
{
    fn local_partition(&self, id: PartitionId, _: TopologyVersion) -> Result<Option<Arc<Partition<K>>>> {
        let partition = match self.partitions.read_recursive().get(&id) {
            Some(partition) => partition.clone(),
            None => return Ok(None),
        };
        match partition.state() {
            PartitionState::Renting | PartitionState::Evicted => {
                Err(Error::invalid_partition(id))
            }
            _ => Ok(Some(partition)),
        }
    }

    fn read_lock_topology(&self) {
        mem::forget(self.partitions.read_recursive());
    }

    fn read_unlock_topology(&self) {
        // SAFETY: Paired with `read_lock_topology`, whose guard was forgotten.
        unsafe { self.partitions.force_unlock_read() };
    }

    fn topology_version(&self) -> TopologyVersion {
        TopologyVersion(self.version.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use atrium_common::error::ErrorKind;

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Partition<u64>>();
        is_send_sync_static::<LocalTopology<u64>>();
    }

    #[test]
    fn test_reserve_refused_when_evicted() {
        let p = Partition::<u64>::new(1, PartitionState::Moving);
        assert!(p.reserve());
        assert_eq!(p.reservations(), 1);
        p.release();

        p.set_state(PartitionState::Renting);
        assert!(!p.reserve());
        p.set_state(PartitionState::Evicted);
        assert!(!p.reserve());
        assert_eq!(p.reservations(), 0);
    }

    #[test]
    fn test_lock_blocks_state_transition() {
        let p = Arc::new(Partition::<u64>::new(1, PartitionState::Moving));
        p.lock();
        assert!(p.is_locked_by_current_thread());

        let handle = {
            let p = p.clone();
            thread::spawn(move || p.set_state(PartitionState::Owning))
        };
        // The other thread cannot complete the transition while the lock is held.
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(p.state(), PartitionState::Moving);

        p.unlock();
        handle.join().unwrap();
        assert_eq!(p.state(), PartitionState::Owning);
        assert!(!p.is_locked_by_current_thread());
    }

    #[test]
    fn test_eviction_history_only_while_moving() {
        let p = Partition::new(1, PartitionState::Moving);
        p.on_entry_evicted(1u64, Version::new(1));
        p.set_state(PartitionState::Owning);
        p.on_entry_evicted(2u64, Version::new(2));
        assert_eq!(p.drain_eviction_history(), vec![(1, Version::new(1))]);
        assert!(p.drain_eviction_history().is_empty());
    }

    #[test]
    fn test_local_topology_lookup() {
        let topology = LocalTopology::<u64>::new();
        topology.create_partition(1, PartitionState::Moving);
        topology.create_partition(2, PartitionState::Owning);

        let p1 = topology.local_partition(1, TopologyVersion::NONE).unwrap().unwrap();
        assert_eq!(p1.state(), PartitionState::Moving);
        assert!(topology.local_partition(3, TopologyVersion::NONE).unwrap().is_none());

        assert!(topology.rent_partition(2));
        let err = topology.local_partition(2, TopologyVersion::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPartition);

        assert!(topology.own(2));
        assert!(topology.local_partition(2, TopologyVersion::NONE).unwrap().is_some());
        assert!(!topology.own(3));
        assert!(format!("{topology:?}").contains("version: 1"));

        let removed = topology.remove_partition(1).unwrap();
        assert_eq!(removed.state(), PartitionState::Evicted);
        assert!(topology.local_partition(1, TopologyVersion::NONE).unwrap().is_none());
    }

    #[test]
    fn test_topology_read_lock_blocks_version_bump() {
        let topology = Arc::new(LocalTopology::<u64>::new());
        topology.read_lock_topology();
        assert_eq!(topology.topology_version(), TopologyVersion(1));

        let handle = {
            let topology = topology.clone();
            thread::spawn(move || topology.bump_version())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(topology.topology_version(), TopologyVersion(1));

        topology.read_unlock_topology();
        assert_eq!(handle.join().unwrap(), TopologyVersion(2));
    }
}
