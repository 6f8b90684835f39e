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

use std::{fmt::Display, marker::PhantomData};

use atrium_common::{code::Key, error::Result};

use crate::version::Version;

/// Identifier of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Request of a remote node to evict entries at the versions it observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionRequest<K> {
    /// Id of the future waiting for the response on the requesting node.
    pub future_id: u64,
    /// Keys to evict with the versions observed by the requesting node.
    pub entries: Vec<(K, Version)>,
}

/// Response to an [`EvictionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionResponse<K> {
    /// Id of the future waiting for the response on the requesting node.
    pub future_id: u64,
    /// Keys that were not evicted.
    pub rejected: Vec<K>,
}

impl<K> EvictionResponse<K> {
    /// Create an empty response.
    pub fn new(future_id: u64) -> Self {
        Self {
            future_id,
            rejected: vec![],
        }
    }
}

/// Delivery channel of eviction responses.
pub trait ResponseSender: Send + Sync + 'static {
    /// Associated key type.
    type Key: Key;

    /// Send `response` to `node`.
    ///
    /// Returns an [`ErrorKind::TopologyChanged`] error if the node has left.
    ///
    /// [`ErrorKind::TopologyChanged`]: atrium_common::error::ErrorKind::TopologyChanged
    fn send(&self, node: NodeId, response: EvictionResponse<Self::Key>) -> Result<()>;
}

/// A response sender that drops every response.
#[derive(Debug)]
pub struct NoopResponseSender<K>(PhantomData<fn() -> K>);

impl<K> Default for NoopResponseSender<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K> ResponseSender for NoopResponseSender<K>
where
    K: Key,
{
    type Key = K;

    fn send(&self, _: NodeId, _: EvictionResponse<Self::Key>) -> Result<()> {
        Ok(())
    }
}
