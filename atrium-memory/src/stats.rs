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
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

/// Snapshot of the eviction statistics of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvictionStats {
    /// Entries evicted one by one.
    pub evictions: u64,
    /// Entries evicted by batch evictions.
    pub batch_evictions: u64,
    /// Touches reported by the cache runtime.
    pub touches: u64,
    /// Accesses reported to the eviction policy.
    pub policy_notifications: u64,
}

impl Display for EvictionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "evictions: {}, batch evictions: {}, touches: {}, policy notifications: {}",
            self.evictions, self.batch_evictions, self.touches, self.policy_notifications
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    evictions: AtomicU64,
    batch_evictions: AtomicU64,
    touches: AtomicU64,
    policy_notifications: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn on_evict(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_batch_evict(&self, count: u64) {
        self.batch_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn on_touch(&self) {
        self.touches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_policy_notify(&self) {
        self.policy_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EvictionStats {
        EvictionStats {
            evictions: self.evictions.load(Ordering::Relaxed),
            batch_evictions: self.batch_evictions.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
            policy_notifications: self.policy_notifications.load(Ordering::Relaxed),
        }
    }
}
