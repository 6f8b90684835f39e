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

/// Monotonically comparable version token of a cache entry.
///
/// Versions are minted by a [`VersionGenerator`]. The highest bit is reserved by the entry state word, so a version
/// never exceeds [`Version::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version(u64);

impl Version {
    /// The largest representable version.
    pub const MAX: Version = Version((1 << 63) - 1);

    /// Create a version from its raw representation.
    ///
    /// # Panics
    ///
    /// Panics if `raw` exceeds [`Version::MAX`].
    pub const fn new(raw: u64) -> Self {
        assert!(raw <= Self::MAX.0, "version overflow");
        Self(raw)
    }

    /// Get the raw representation of the version.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Topology version observed while holding the topology read lock.
///
/// Informational only, it is never used as a write guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopologyVersion(pub u64);

impl TopologyVersion {
    /// Topology version of caches that are not topology aware (e.g. near caches).
    pub const ZERO: TopologyVersion = TopologyVersion(0);
    /// Wildcard topology version used for local partition lookups.
    pub const NONE: TopologyVersion = TopologyVersion(u64::MAX);
}

impl Display for TopologyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NONE => write!(f, "none"),
            Self(v) => write!(f, "{v}"),
        }
    }
}

/// Generator of strictly increasing entry versions.
#[derive(Debug)]
pub struct VersionGenerator {
    next: AtomicU64,
}

impl Default for VersionGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl VersionGenerator {
    /// Create a generator that mints `start` first.
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Mint the next version.
    pub fn next(&self) -> Version {
        Version::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Peek the version that will be minted next.
    pub fn peek(&self) -> Version {
        Version::new(self.next.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn test_versions_are_unique_and_increasing() {
        let versions = VersionGenerator::default();
        let a = versions.next();
        let b = versions.next();
        assert!(a < b);
        assert_eq!(versions.peek().raw(), b.raw() + 1);

        let minted = thread::scope(|s| {
            let handles = (0..4)
                .map(|_| s.spawn(|| (0..1000).map(|_| versions.next()).collect::<Vec<_>>()))
                .collect::<Vec<_>>();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect::<HashSet<_>>()
        });
        assert_eq!(minted.len(), 4000);
    }

    #[test]
    #[should_panic(expected = "version overflow")]
    fn test_version_overflow() {
        let _ = Version::new(u64::MAX);
    }
}
