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

use std::sync::Arc;

use itertools::Itertools;
use locus_cache::{
    snapshot::RegistrySnapshot,
    status::{ServerState, StateUpdate, StatusKey, StatusTracker, SyncReport},
};
use locus_common::{
    error::{Error, ErrorKind, Result},
    snapshot::SnapshotCache,
};
use mixtrics::{metrics::BoxedRegistry, registry::noop::NoopMetricsRegistry};

use crate::{
    collaborator::{Alarm, DynamicWeight, LogAlarm, StaticWeight},
    config::RegistryConfig,
    metrics::Metrics,
    refresher::{ReloadReport, Refresher, RefresherHandle},
    resolver::Resolver,
    store::{RegistryStore, StateField},
};

/// Builder of a [`Registry`].
pub struct RegistryBuilder {
    store: Arc<dyn RegistryStore>,
    config: RegistryConfig,
    weight: Arc<dyn DynamicWeight>,
    alarm: Arc<dyn Alarm>,
    metrics_registry: BoxedRegistry,
}

impl RegistryBuilder {
    /// Create a builder over `store`.
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            config: RegistryConfig::default(),
            weight: Arc::new(StaticWeight),
            alarm: Arc::new(LogAlarm),
            metrics_registry: Box::new(NoopMetricsRegistry),
        }
    }

    /// Set the registry config.
    ///
    /// Default: [`RegistryConfig::default`].
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the dynamic weight collaborator applied to every lookup result.
    ///
    /// Default: [`StaticWeight`].
    pub fn with_dynamic_weight(mut self, weight: Arc<dyn DynamicWeight>) -> Self {
        self.weight = weight;
        self
    }

    /// Set the alarm notified of failed reloads.
    ///
    /// Default: [`LogAlarm`].
    pub fn with_alarm(mut self, alarm: Arc<dyn Alarm>) -> Self {
        self.alarm = alarm;
        self
    }

    /// Set the metrics registry the registry counters are registered to.
    ///
    /// Default: [`NoopMetricsRegistry`].
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.metrics_registry = registry;
        self
    }

    /// Validate the config, run the startup full reload and build the registry.
    ///
    /// Any failure of the startup reload is returned: the caller decides whether to exit.
    pub fn build(self) -> Result<Registry> {
        self.config.validate()?;

        let snapshot = Arc::new(SnapshotCache::<RegistrySnapshot>::default());
        let tracker = Arc::new(StatusTracker::default());
        let metrics = Arc::new(Metrics::new(&self.metrics_registry));
        let refresher = Arc::new(Refresher::new(
            self.store.clone(),
            snapshot.clone(),
            tracker.clone(),
            self.alarm,
            metrics.clone(),
            self.config.clone(),
        ));
        let resolver = Resolver::new(snapshot.clone(), self.weight, metrics.clone());

        let report = refresher.reload(true)?;
        tracing::info!(
            "[registry] started, servants: {}, endpoints: {}",
            report.servants,
            report.endpoints
        );

        Ok(Registry {
            inner: Arc::new(RegistryInner {
                config: self.config,
                store: self.store,
                snapshot,
                tracker,
                metrics,
                refresher,
                resolver,
            }),
        })
    }
}

#[derive(Debug)]
struct RegistryInner {
    config: RegistryConfig,
    store: Arc<dyn RegistryStore>,
    snapshot: Arc<SnapshotCache<RegistrySnapshot>>,
    tracker: Arc<StatusTracker>,
    metrics: Arc<Metrics>,
    refresher: Arc<Refresher>,
    resolver: Resolver,
}

/// The registry lookup core.
///
/// Cheap to clone: clones share the same caches.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Lookup entry point.
    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.snapshot.read()
    }

    /// Generation of the published snapshot. Bumped by every published reload.
    pub fn generation(&self) -> u64 {
        self.inner.snapshot.generation()
    }

    /// Instance states.
    pub fn tracker(&self) -> &StatusTracker {
        &self.inner.tracker
    }

    /// Registry config.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Persist the admin state of one instance, then track it.
    ///
    /// Endpoint lists pick the change up on the next reload.
    pub fn set_admin_state(&self, key: &StatusKey, state: ServerState) -> Result<usize> {
        let affected = self.inner.store.write_state(key, StateField::SettingState, state, 0)?;
        tracing::debug!("[registry] admin state of {key} set to {state:?}, affected: {affected}");
        self.inner.tracker.set_state(key.clone(), state);
        Ok(affected)
    }

    /// Persist the liveness state and process id of one instance, then track it.
    pub fn set_present_state(&self, key: &StatusKey, state: ServerState, process_id: i32) -> Result<usize> {
        let affected = self
            .inner
            .store
            .write_state(key, StateField::PresentState, state, process_id)?;
        tracing::debug!("[registry] present state of {key} set to {state:?}, pid: {process_id}, affected: {affected}");
        self.inner.tracker.set_state(key.clone(), state);
        Ok(affected)
    }

    /// Persist the flow state of several nodes of one server, then track it.
    pub fn set_flow_state(
        &self,
        application: &str,
        server_name: &str,
        nodes: &[String],
        state: ServerState,
    ) -> Result<usize> {
        let affected = self
            .inner
            .store
            .write_flow_state(application, server_name, nodes, state)?;
        tracing::debug!(
            "[registry] flow state of {application}.{server_name} on [{}] set to {state:?}, affected: {affected}",
            nodes.iter().join(",")
        );
        self.inner
            .tracker
            .set_flow_states(application, server_name, nodes, state);
        Ok(affected)
    }

    /// Persist the liveness states that differ from the tracked ones.
    ///
    /// See [`StatusTracker::sync_batch`].
    pub fn sync_states(&self, updates: &[StateUpdate]) -> Result<SyncReport> {
        let store = &self.inner.store;
        let report = self
            .inner
            .tracker
            .sync_batch(updates, self.inner.config.sync_chunk_size, |groups| {
                store.write_state_batch(groups)
            })
            .inspect_err(|e| tracing::error!("[registry] state sync failed: {e}"))?;
        self.inner.metrics.record_sync(report.suppressed, report.written);
        tracing::debug!(
            "[registry] state sync, submitted: {}, suppressed: {}, written: {}, affected rows: {}",
            report.submitted,
            report.suppressed,
            report.written,
            report.affected_rows
        );
        Ok(report)
    }

    /// Reload now, blocking the caller until the reload ends.
    pub fn trigger_reload(&self, full: bool) -> Result<ReloadReport> {
        self.inner.refresher.reload(full)
    }

    /// Start periodic reloads on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_refresher(&self) -> RefresherHandle {
        RefresherHandle::spawn(self.inner.refresher.clone())
    }

    /// Record the servants this registry instance serves, so that they are handed out like any other servant.
    ///
    /// Does nothing when heartbeats are off.
    pub fn report_heartbeat(&self, locator_id: &str, servants: &[(String, String)], version: &str) -> Result<usize> {
        if self.inner.config.heartbeat_off {
            tracing::debug!("[registry] heartbeat is off");
            return Ok(0);
        }
        if servants.is_empty() {
            return Err(Error::new(ErrorKind::Config, "no servant to report").with_context("locator", locator_id));
        }
        self.inner.store.write_heartbeat(locator_id, servants, version)
    }
}
