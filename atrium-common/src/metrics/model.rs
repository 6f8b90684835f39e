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

use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, BoxedHistogram, RegistryOps};

/// Metrics of the eviction engine of one cache.
#[derive(Debug)]
pub struct Metrics {
    /// Entries evicted by single-entry eviction.
    pub eviction_evict: BoxedCounter,
    /// Single-entry eviction attempts that left the entry in place.
    pub eviction_reject: BoxedCounter,
    /// Entries evicted by batch eviction.
    pub eviction_batch: BoxedCounter,
    /// Entries of a batch that could not be removed by the batch.
    pub eviction_batch_not_removable: BoxedCounter,
    /// Touch notifications.
    pub eviction_touch: BoxedCounter,
    /// Obsolete or empty entries removed lazily on touch.
    pub eviction_cleanup: BoxedCounter,
    /// Notifications delivered to the eviction policy.
    pub eviction_policy_notify: BoxedCounter,

    /// Records handed to the swap writer.
    pub eviction_swap_records: BoxedCounter,
    /// Duration of batched swap writes in seconds.
    pub eviction_swap_write_duration: BoxedHistogram,

    /// Operations currently admitted by the eviction manager.
    pub eviction_in_flight: BoxedGauge,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &dyn RegistryOps) -> Self {
        let name: Cow<'static, str> = name.into();

        let atrium_eviction_op_total = registry.register_counter_vec(
            "atrium_eviction_op_total".into(),
            "atrium eviction operations".into(),
            &["name", "op"],
        );
        let atrium_eviction_swap_records = registry.register_counter_vec(
            "atrium_eviction_swap_records".into(),
            "atrium records written to swap".into(),
            &["name"],
        );
        let atrium_eviction_swap_duration = registry.register_histogram_vec(
            "atrium_eviction_swap_duration".into(),
            "atrium batched swap write durations".into(),
            &["name"],
        );
        let atrium_eviction_in_flight = registry.register_gauge_vec(
            "atrium_eviction_in_flight".into(),
            "atrium eviction operations in flight".into(),
            &["name"],
        );

        let op = |op: &'static str| atrium_eviction_op_total.counter(&[name.clone(), op.into()]);

        let eviction_evict = op("evict");
        let eviction_reject = op("reject");
        let eviction_batch = op("batch");
        let eviction_batch_not_removable = op("batch_not_removable");
        let eviction_touch = op("touch");
        let eviction_cleanup = op("cleanup");
        let eviction_policy_notify = op("policy_notify");

        let eviction_swap_records = atrium_eviction_swap_records.counter(&[name.clone()]);
        let eviction_swap_write_duration = atrium_eviction_swap_duration.histogram(&[name.clone()]);
        let eviction_in_flight = atrium_eviction_in_flight.gauge(&[name.clone()]);

        Self {
            eviction_evict,
            eviction_reject,
            eviction_batch,
            eviction_batch_not_removable,
            eviction_touch,
            eviction_cleanup,
            eviction_policy_notify,
            eviction_swap_records,
            eviction_swap_write_duration,
            eviction_in_flight,
        }
    }

    /// Build noop metrics.
    ///
    /// Note: `noop` is only supposed to be called by other atrium components.
    #[doc(hidden)]
    pub fn noop() -> Self {
        use super::registry::noop::NoopMetricsRegistry;

        Self::new("test", &NoopMetricsRegistry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::noop::NoopMetricsRegistry;

    #[test]
    fn test_metrics_noop() {
        let metrics = Metrics::new("test", &NoopMetricsRegistry);
        metrics.eviction_evict.increase(1);
        metrics.eviction_swap_write_duration.record(0.5);
        metrics.eviction_in_flight.increase(1);
        metrics.eviction_in_flight.decrease(1);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_metrics_prometheus() {
        use crate::metrics::registry::prometheus::PrometheusMetricsRegistry;

        let registry = PrometheusMetricsRegistry::new(prometheus::Registry::new());
        let metrics = Metrics::new("test", &registry);
        metrics.eviction_batch.increase(3);

        // Registering the same metrics twice on one registry must not fail.
        let _ = Metrics::new("test", &registry);
    }
}
