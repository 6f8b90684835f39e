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

//! atrium - eviction engine for partitioned in-memory caches.
//!
//! The engine decides when an entry of a partitioned in-memory cache may be removed from memory, and removes it
//! without racing with transactions, partition rebalancing or overlapping evictions.
//!
//! ```
//! use std::sync::Arc;
//!
//! use atrium::{EvictionManagerBuilder, ShardedEntryTable, Version};
//!
//! let table = Arc::new(ShardedEntryTable::<u64, String>::new(4, 16));
//! let manager = EvictionManagerBuilder::<u64, String>::new("users")
//!     .with_rebalance(false)
//!     .with_entry_table(table.clone())
//!     .build()
//!     .unwrap();
//! manager.start(None, None).unwrap();
//!
//! let entry = table.insert(1, Some("alice".to_string()), Version::new(1));
//! assert!(manager.evict(Some(&entry), None, true, None));
//! assert!(table.is_empty());
//! ```

use atrium_common as common;
use atrium_memory as memory;

mod prelude;
pub use prelude::*;
