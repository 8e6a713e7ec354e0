// Copyright 2026 locus Project Authors
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

use mixtrics::{
    metrics::{BoxedCounter, BoxedRegistry},
    registry::noop::NoopMetricsRegistry,
};

/// Which lookup strategy served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// Plain and active-only lookups.
    Plain,
    Group,
    Priority,
    Station,
    Set,
}

/// Registry counters, registered as one `locus_op_total` counter vector labelled by `op`.
#[derive(Debug)]
pub struct Metrics {
    lookup_plain: BoxedCounter,
    lookup_group: BoxedCounter,
    lookup_priority: BoxedCounter,
    lookup_station: BoxedCounter,
    lookup_set: BoxedCounter,
    lookup_not_found: BoxedCounter,

    reload_full: BoxedCounter,
    reload_incremental: BoxedCounter,
    reload_failed: BoxedCounter,
    reload_protected: BoxedCounter,
    reload_rejected: BoxedCounter,
    reload_skipped_row: BoxedCounter,

    sync_suppressed: BoxedCounter,
    sync_written: BoxedCounter,
}

impl Metrics {
    /// Register the registry counters to `registry`.
    pub fn new(registry: &BoxedRegistry) -> Self {
        let locus_op_total = registry.register_counter_vec(
            "locus_op_total".into(),
            "locus registry operations".into(),
            &["op"],
        );
        let counter = |op: &'static str| locus_op_total.counter(&[op.into()]);

        Self {
            lookup_plain: counter("lookup_plain"),
            lookup_group: counter("lookup_group"),
            lookup_priority: counter("lookup_priority"),
            lookup_station: counter("lookup_station"),
            lookup_set: counter("lookup_set"),
            lookup_not_found: counter("lookup_not_found"),

            reload_full: counter("reload_full"),
            reload_incremental: counter("reload_incremental"),
            reload_failed: counter("reload_failed"),
            reload_protected: counter("reload_protected"),
            reload_rejected: counter("reload_rejected"),
            reload_skipped_row: counter("reload_skipped_row"),

            sync_suppressed: counter("sync_suppressed"),
            sync_written: counter("sync_written"),
        }
    }

    /// Counters that record nothing.
    pub fn noop() -> Self {
        let registry: BoxedRegistry = Box::new(NoopMetricsRegistry);
        Self::new(&registry)
    }

    pub(crate) fn record_reload(&self, full: bool, skipped_rows: usize) {
        if full {
            self.reload_full.increase(1);
        } else {
            self.reload_incremental.increase(1);
        }
        self.reload_skipped_row.increase(skipped_rows as u64);
    }

    pub(crate) fn record_failed_reload(&self, protected: bool) {
        self.reload_failed.increase(1);
        if protected {
            self.reload_protected.increase(1);
        }
    }

    pub(crate) fn record_rejected_reload(&self) {
        self.reload_rejected.increase(1);
    }

    pub(crate) fn record_lookup(&self, strategy: Strategy) {
        let counter = match strategy {
            Strategy::Plain => &self.lookup_plain,
            Strategy::Group => &self.lookup_group,
            Strategy::Priority => &self.lookup_priority,
            Strategy::Station => &self.lookup_station,
            Strategy::Set => &self.lookup_set,
        };
        counter.increase(1);
    }

    pub(crate) fn record_not_found(&self) {
        self.lookup_not_found.increase(1);
    }

    pub(crate) fn record_sync(&self, suppressed: usize, written: usize) {
        self.sync_suppressed.increase(suppressed as u64);
        self.sync_written.increase(written as u64);
    }
}
