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

//! Utilities for testing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use atrium_common::{
    code::{Key, Value},
    error::{Error, ErrorKind, Result},
    event::{Event, EventRecorder},
};
use parking_lot::Mutex;

use crate::{
    message::{EvictionResponse, NodeId, ResponseSender},
    policy::EvictionPolicy,
    record::EntryView,
    swap::{SwapRecord, SwapWriter},
    version::Version,
};

/// A policy that records all accesses as `(key, obsolete)`.
#[derive(Debug)]
pub struct RecordingPolicy<K, V> {
    accesses: Mutex<Vec<(K, bool)>>,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<K, V> Default for RecordingPolicy<K, V> {
    fn default() -> Self {
        Self {
            accesses: Mutex::new(vec![]),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<K, V> EvictionPolicy for RecordingPolicy<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn on_entry_accessed(&self, obsolete: bool, entry: EntryView<'_, Self::Key, Self::Value>) {
        self.accesses.lock().push((entry.key().clone(), obsolete));
    }
}

impl<K, V> RecordingPolicy<K, V>
where
    K: Clone,
{
    /// Get all recorded accesses.
    pub fn accesses(&self) -> Vec<(K, bool)> {
        self.accesses.lock().clone()
    }
}

/// A swap writer that records all written batches as `(key, value, version)` and can be told to fail.
#[derive(Debug)]
pub struct RecordingSwapWriter<K, V> {
    batches: Mutex<Vec<Vec<(K, Arc<V>, Version)>>>,
    fail: AtomicBool,
}

impl<K, V> Default for RecordingSwapWriter<K, V> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(vec![]),
            fail: AtomicBool::new(false),
        }
    }
}

impl<K, V> SwapWriter for RecordingSwapWriter<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn write_all(&self, records: Vec<SwapRecord<Self::Key, Self::Value>>) -> Result<()> {
        if self.fail.swap(false, Ordering::AcqRel) {
            return Err(Error::io_error(std::io::Error::other("disk full")).with_context("records", records.len()));
        }
        let batch = records
            .into_iter()
            .map(|record| (record.key, record.value, record.version))
            .collect();
        self.batches.lock().push(batch);
        Ok(())
    }
}

impl<K, V> RecordingSwapWriter<K, V>
where
    K: Clone,
{
    /// Fail the next write.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::Release);
    }

    /// Get all written batches.
    pub fn batches(&self) -> Vec<Vec<(K, Arc<V>, Version)>> {
        self.batches.lock().clone()
    }
}

/// An event recorder that records evictions as `(partition, key, old value, had value)`.
#[derive(Debug)]
pub struct RecordingEventRecorder<K, V> {
    evictions: Mutex<Vec<(u32, K, Option<V>, bool)>>,
}

impl<K, V> Default for RecordingEventRecorder<K, V> {
    fn default() -> Self {
        Self {
            evictions: Mutex::new(vec![]),
        }
    }
}

impl<K, V> EventRecorder for RecordingEventRecorder<K, V>
where
    K: Key,
    V: Value + Clone,
{
    type Key = K;
    type Value = V;

    fn is_recordable(&self, event: Event) -> bool {
        matches!(event, Event::Evicted)
    }

    fn record_eviction(&self, partition: u32, key: &Self::Key, old_value: Option<&Self::Value>, had_value: bool) {
        self.evictions
            .lock()
            .push((partition, key.clone(), old_value.cloned(), had_value));
    }
}

impl<K, V> RecordingEventRecorder<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Get all recorded evictions.
    pub fn evictions(&self) -> Vec<(u32, K, Option<V>, bool)> {
        self.evictions.lock().clone()
    }
}

/// A response sender that records all delivered responses and can be told to fail.
#[derive(Debug)]
pub struct RecordingResponseSender<K> {
    responses: Mutex<Vec<(NodeId, EvictionResponse<K>)>>,
    fail: Mutex<Option<ErrorKind>>,
}

impl<K> Default for RecordingResponseSender<K> {
    fn default() -> Self {
        Self {
            responses: Mutex::new(vec![]),
            fail: Mutex::new(None),
        }
    }
}

impl<K> ResponseSender for RecordingResponseSender<K>
where
    K: Key,
{
    type Key = K;

    fn send(&self, node: NodeId, response: EvictionResponse<Self::Key>) -> Result<()> {
        if let Some(kind) = self.fail.lock().take() {
            return Err(Error::new(kind, "failed to send eviction response").with_context("node", node));
        }
        self.responses.lock().push((node, response));
        Ok(())
    }
}

impl<K> RecordingResponseSender<K>
where
    K: Clone,
{
    /// Fail the next delivery with the given error kind.
    pub fn fail_next(&self, kind: ErrorKind) {
        *self.fail.lock() = Some(kind);
    }

    /// Get all delivered responses.
    pub fn responses(&self) -> Vec<(NodeId, EvictionResponse<K>)> {
        self.responses.lock().clone()
    }
}
