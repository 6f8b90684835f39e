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
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use atrium_common::{
    code::{Key, Value},
    error::Result,
};
use equivalent::Equivalent;
use hashbrown::{
    hash_table::{Entry as HashTableEntry, HashTable},
    DefaultHashBuilder,
};
use parking_lot::RwLock;

use crate::{partition::PartitionId, record::CacheEntry, version::Version};

/// Live entry table of a cache.
///
/// The table is mutated by the cache runtime and by the eviction manager. It must be internally thread-safe.
pub trait EntryTable<K, V>: Send + Sync + 'static {
    /// Get the entry currently mapped to `key` without touching it.
    fn peek(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>>;

    /// Remove `entry` from the table.
    ///
    /// Only the identical entry instance is removed, a newer entry mapped to the same key is kept. Returns `true` if
    /// the entry was removed.
    fn remove_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> Result<bool>;
}

/// A sharded hash-based [`EntryTable`].
pub struct ShardedEntryTable<K, V, S = DefaultHashBuilder> {
    shards: Vec<RwLock<HashTable<Arc<CacheEntry<K, V>>>>>,
    partitions: u32,
    hash_builder: S,
}

impl<K, V, S> Debug for ShardedEntryTable<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedEntryTable")
            .field("shards", &self.shards.len())
            .field("partitions", &self.partitions)
            .finish()
    }
}

impl<K, V> ShardedEntryTable<K, V> {
    /// Create a table with `shards` shards that routes keys to `partitions` partitions.
    pub fn new(shards: usize, partitions: u32) -> Self {
        Self::with_hash_builder(shards, partitions, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ShardedEntryTable<K, V, S> {
    /// Create a table with a custom hash builder.
    pub fn with_hash_builder(shards: usize, partitions: u32, hash_builder: S) -> Self {
        assert!(shards > 0, "shards must be greater than zero.");
        assert!(partitions > 0, "partitions must be greater than zero.");
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashTable::new())).collect(),
            partitions,
            hash_builder,
        }
    }

    /// Count of partitions keys are routed to.
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Count of entries of all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns `true` if the table holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, hash: u64) -> usize {
        hash as usize % self.shards.len()
    }
}

impl<K, V, S> ShardedEntryTable<K, V, S>
where
    K: Key,
    V: Value,
    S: BuildHasher,
{
    /// Partition `key` is routed to.
    pub fn partition_of<Q>(&self, key: &Q) -> PartitionId
    where
        Q: Hash + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        ((hash >> 32) % self.partitions as u64) as PartitionId
    }

    /// Create a live entry for `key` and map it, replacing the previous one.
    pub fn insert(&self, key: K, value: Option<V>, version: Version) -> Arc<CacheEntry<K, V>> {
        let partition = self.partition_of(&key);
        let entry = Arc::new(CacheEntry::new(key, value, version, partition));
        self.insert_entry(entry.clone());
        entry
    }

    /// Map an entry, returning the entry it replaced.
    pub fn insert_entry(&self, mut entry: Arc<CacheEntry<K, V>>) -> Option<Arc<CacheEntry<K, V>>> {
        let hash = self.hash_builder.hash_one(entry.key());
        let mut shard = self.shards[self.shard(hash)].write();
        match shard.entry(
            hash,
            |e| e.key() == entry.key(),
            |e| self.hash_builder.hash_one(e.key()),
        ) {
            HashTableEntry::Occupied(mut o) => {
                std::mem::swap(o.get_mut(), &mut entry);
                Some(entry)
            }
            HashTableEntry::Vacant(v) => {
                v.insert(entry);
                None
            }
        }
    }

    /// Get the entry mapped to `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.shards[self.shard(hash)]
            .read()
            .find(hash, |e| key.equivalent(e.key()))
            .cloned()
    }
}

impl<K, V, S> EntryTable<K, V> for ShardedEntryTable<K, V, S>
where
    K: Key,
    V: Value,
    S: BuildHasher + Send + Sync + 'static,
{
    fn peek(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.get(key)
    }

    fn remove_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> Result<bool> {
        let hash = self.hash_builder.hash_one(entry.key());
        let mut shard = self.shards[self.shard(hash)].write();
        match shard.find_entry(hash, |e| Arc::ptr_eq(e, entry)) {
            Ok(o) => {
                o.remove();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
