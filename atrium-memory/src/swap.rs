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

use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use atrium_common::{
    code::{Key, Value},
    error::Result,
};

use crate::{partition::PartitionId, version::Version};

/// An evicted entry handed to the swap writer.
#[derive(Debug)]
pub struct SwapRecord<K, V> {
    /// Key of the evicted entry.
    pub key: K,
    /// Version of the entry at the time it was marked obsolete.
    pub version: Version,
    /// Partition of the evicted entry.
    pub partition: PartitionId,
    /// Value snapshot of the evicted entry.
    pub value: Arc<V>,
}

impl<K, V> Clone for SwapRecord<K, V>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            version: self.version,
            partition: self.partition,
            value: self.value.clone(),
        }
    }
}

/// Off-heap or on-disk persistence target of evicted entries.
pub trait SwapWriter: Send + Sync + 'static {
    /// Associated key type.
    type Key: Key;
    /// Associated value type.
    type Value: Value;

    /// Returns `true` if evicted entries should be swapped at all.
    ///
    /// Batch eviction skips collecting records when the writer is disabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Persist a batch of evicted entries.
    ///
    /// The batch is written with a single call. A failure is a failure of the whole batch.
    fn write_all(&self, records: Vec<SwapRecord<Self::Key, Self::Value>>) -> Result<()>;
}

/// A swap writer that drops every record.
pub struct NoopSwapWriter<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Debug for NoopSwapWriter<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NoopSwapWriter").finish()
    }
}

impl<K, V> Default for NoopSwapWriter<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> SwapWriter for NoopSwapWriter<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn is_enabled(&self) -> bool {
        false
    }

    fn write_all(&self, _: Vec<SwapRecord<Self::Key, Self::Value>>) -> Result<()> {
        Ok(())
    }
}
