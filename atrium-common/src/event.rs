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

use std::{fmt::Debug, marker::PhantomData};

use crate::code::{Key, Value};

/// Event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum Event {
    /// A cache entry has been evicted from the in-memory cache.
    Evicted,
}

/// Trait for the customized event recorder.
///
/// Recording is best-effort: the recorder has no way to fail the operation that emits the event.
pub trait EventRecorder: Send + Sync + 'static {
    /// Associated key type.
    type Key: Key;
    /// Associated value type.
    type Value: Value;

    /// Returns `true` if events of the given type should be recorded.
    ///
    /// Emitters skip capturing event payloads (e.g. old value snapshots) when this returns `false`.
    fn is_recordable(&self, event: Event) -> bool;

    /// Called when a cache entry has been evicted.
    ///
    /// `old_value` is the value snapshot taken right before the eviction, `had_value` tells whether the entry was
    /// holding a value at that time.
    fn record_eviction(&self, partition: u32, key: &Self::Key, old_value: Option<&Self::Value>, had_value: bool);
}

/// Event recorder that records nothing.
pub struct NoopEventRecorder<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Debug for NoopEventRecorder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoopEventRecorder").finish()
    }
}

impl<K, V> Default for NoopEventRecorder<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> EventRecorder for NoopEventRecorder<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn is_recordable(&self, _: Event) -> bool {
        false
    }

    fn record_eviction(&self, _: u32, _: &Self::Key, _: Option<&Self::Value>, _: bool) {}
}
