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

//! Helpers shared by the unit tests.

use mixtrics::{metrics::BoxedRegistry, registry::prometheus::PrometheusMetricsRegistry};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::Metrics;

/// Metrics registered to a fresh prometheus registry, so counters can be read back.
pub fn prometheus_metrics() -> (Registry, Metrics) {
    let registry = Registry::new();
    let boxed: BoxedRegistry = Box::new(PrometheusMetricsRegistry::new(registry.clone()));
    (registry, Metrics::new(&boxed))
}

/// Value of `locus_op_total{op="<op>"}`, zero when the series is absent.
pub fn op_total(registry: &Registry, op: &str) -> u64 {
    let mut buf = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let prefix = format!("locus_op_total{{op=\"{op}\"}} ");
    text.lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|value| value.trim().parse::<f64>().unwrap() as u64)
        .unwrap_or_default()
}
