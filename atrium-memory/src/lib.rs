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

//! The eviction engine of the atrium in-memory cache.
//!
//! The [`EvictionManager`] decides when a cache entry may be removed from memory and removes it without racing with
//! transactions, partition rebalancing or overlapping evictions of the same entry.

mod builder;
mod manager;
mod message;
mod partition;
mod policy;
mod prelude;
mod record;
mod stats;
mod swap;
mod table;
mod version;

pub use prelude::*;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
