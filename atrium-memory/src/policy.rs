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

use atrium_common::code::{Key, Value};

use crate::record::EntryView;

/// Pluggable eviction policy.
///
/// The policy tracks candidates and decides what to evict. The manager only reports accesses to it and executes the
/// evictions it requests.
pub trait EvictionPolicy: Send + Sync + 'static {
    /// Associated key type.
    type Key: Key;
    /// Associated value type.
    type Value: Value;

    /// Called on every touch and on explicit evictions.
    ///
    /// `obsolete` is `true` if the entry is obsolete or holds no value, the policy is expected to forget it then. The
    /// view must not be retained beyond the call.
    fn on_entry_accessed(&self, obsolete: bool, entry: EntryView<'_, Self::Key, Self::Value>);
}

/// Veto gate consulted before an accessed entry is reported to the policy.
pub trait EvictionFilter: Send + Sync + 'static {
    /// Associated key type.
    type Key: Key;
    /// Associated value type.
    type Value: Value;

    /// Returns `true` if the entry may be tracked as an eviction candidate.
    fn evict_allowed(&self, entry: EntryView<'_, Self::Key, Self::Value>) -> bool;
}

/// Admission predicate of a single eviction.
pub trait EntryPredicate<K, V>: Fn(EntryView<'_, K, V>) -> bool + Send + Sync + 'static {}

impl<K, V, F> EntryPredicate<K, V> for F where F: Fn(EntryView<'_, K, V>) -> bool + Send + Sync + 'static {}
