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

//! Reloads the caches from the store and publishes them.

use std::{
    mem,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use locus_cache::{set::SetDivisionIndex, snapshot::RegistrySnapshot, status::StatusTracker};
use locus_common::{
    error::{Error, ErrorKind, Result},
    snapshot::SnapshotCache,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    collaborator::Alarm,
    config::RegistryConfig,
    load::{self, ServantLoader},
    metrics::Metrics,
    store::RegistryStore,
};

/// Outcome of a published reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    /// Whether the reload was full.
    pub full: bool,
    /// Snapshot generation published by the reload.
    pub generation: u64,
    /// Servants loaded from the store rows.
    pub loaded_servants: usize,
    /// Servants in the published snapshot.
    pub servants: usize,
    /// Endpoints in the published snapshot.
    pub endpoints: usize,
    /// Rows skipped as malformed.
    pub skipped_rows: usize,
    /// Instance states loaded.
    pub states: usize,
}

pub(crate) async fn asyncify<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => Err(Error::new(ErrorKind::Join, "blocking task failed").with_source(e)),
    }
}

/// Rebuilds the caches from the store.
///
/// At most one reload runs at a time. A reload requested while another runs is rejected rather than queued.
#[derive(Debug)]
pub struct Refresher {
    store: Arc<dyn RegistryStore>,
    snapshot: Arc<SnapshotCache<RegistrySnapshot>>,
    tracker: Arc<StatusTracker>,
    alarm: Arc<dyn Alarm>,
    metrics: Arc<Metrics>,
    config: RegistryConfig,
    reload_lock: Mutex<()>,
}

impl Refresher {
    /// Create a refresher publishing into `snapshot` and `tracker`.
    pub fn new(
        store: Arc<dyn RegistryStore>,
        snapshot: Arc<SnapshotCache<RegistrySnapshot>>,
        tracker: Arc<StatusTracker>,
        alarm: Arc<dyn Alarm>,
        metrics: Arc<Metrics>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            snapshot,
            tracker,
            alarm,
            metrics,
            config,
            reload_lock: Mutex::new(()),
        }
    }

    /// Reload and publish.
    ///
    /// A full reload rebuilds every cache. An incremental one re-reads the servers changed within the configured
    /// window and replaces their servants wholesale.
    ///
    /// On failure nothing is published and the tracker is left untouched. Store failures and tripped recover
    /// protection also raise an alarm.
    pub fn reload(&self, full: bool) -> Result<ReloadReport> {
        let Some(_guard) = self.reload_lock.try_lock() else {
            tracing::warn!("[refresher] reload rejected, another reload is in progress, full: {full}");
            self.metrics.record_rejected_reload();
            return Err(Error::new(ErrorKind::ReloadInProgress, "another reload is in progress"));
        };

        match self.reload_locked(full) {
            Ok(report) => {
                self.metrics.record_reload(full, report.skipped_rows);
                tracing::info!(
                    "[refresher] reload published, full: {}, generation: {}, loaded servants: {}, servants: {}, endpoints: {}, skipped rows: {}, states: {}, inactive ratio: {:.3}",
                    report.full,
                    report.generation,
                    report.loaded_servants,
                    report.servants,
                    report.endpoints,
                    report.skipped_rows,
                    report.states,
                    self.tracker.inactive_ratio()
                );
                Ok(report)
            }
            Err(e) => {
                let protected = e.kind() == ErrorKind::FleetAnomaly;
                self.metrics.record_failed_reload(protected);
                if protected {
                    tracing::warn!("[refresher] recover protection kept the last snapshot, full: {full}, error: {e}");
                } else {
                    tracing::error!("[refresher] reload failed, full: {full}, error: {e}");
                }
                if matches!(e.kind(), ErrorKind::Store | ErrorKind::FleetAnomaly) {
                    self.alarm.notify_error(&format!("registry reload failed: {e}"));
                }
                Err(e)
            }
        }
    }

    fn reload_locked(&self, full: bool) -> Result<ReloadReport> {
        let current = self.snapshot.read();

        let (groups, priorities) = if full {
            let rules = self.store.query_group_rules()?;
            let priorities = self.store.query_group_priority()?;
            (
                Arc::new(load::build_group_index(&rules)),
                Arc::new(load::build_priority_table(&priorities)),
            )
        } else {
            (current.groups.clone(), current.priorities.clone())
        };

        let since = (!full).then(|| {
            SystemTime::now()
                .checked_sub(self.config.incremental_window())
                .unwrap_or(UNIX_EPOCH)
        });
        let servers = self.store.query_servers(since)?;
        let registrations = self.store.query_self_registrations()?;

        let mut loaded = ServantLoader::new(&groups)
            .load_servers(&servers)
            .load_registrations(&registrations)
            .finish();
        let loaded_servants = loaded.objects.len();

        if self.config.recover_protect && loaded.objects.endpoint_count() > 0 {
            self.check_fleet()?;
        }

        let next = if full {
            // Servants left without endpoints, e.g. backup-only ones, are unknown after a full reload.
            let mut objects = mem::take(&mut loaded.objects);
            objects.prune_empty();
            let mut sets = SetDivisionIndex::default();
            loaded.apply_sets(&mut sets);
            RegistrySnapshot {
                groups,
                priorities,
                objects: Arc::new(objects),
                sets: Arc::new(sets),
            }
        } else {
            let mut objects = (*current.objects).clone();
            objects.replace_servants(mem::take(&mut loaded.objects));
            let mut sets = (*current.sets).clone();
            loaded.apply_sets(&mut sets);
            current.with_servants(objects, sets)
        };

        let servants = next.objects.len();
        let endpoints = next.objects.endpoint_count();
        let states = loaded.states.len();

        let generation = self.snapshot.replace(next);
        self.tracker.replace_states(loaded.states, full);
        self.tracker.replace_flow_states(loaded.flow_states, full);

        Ok(ReloadReport {
            full,
            generation,
            loaded_servants,
            servants,
            endpoints,
            skipped_rows: loaded.skipped,
            states,
        })
    }

    /// Fails when the share of inactive nodes reaches the recover protect rate.
    fn check_fleet(&self) -> Result<()> {
        let nodes = self.store.query_nodes()?;
        let total = nodes.len();
        let inactive = nodes.iter().filter(|node| !node.present_state.is_active()).count();
        let rate = self.config.recover_protect_rate;
        tracing::debug!("[refresher] fleet check, inactive: {inactive}, total: {total}, rate: {rate}%");
        if inactive > 0 && inactive * 100 >= rate as usize * total {
            return Err(Error::fleet_anomaly(inactive, total, rate));
        }
        Ok(())
    }

    /// Reload periodically until `stop_rx` fires or its sender is dropped.
    ///
    /// Every tick runs an incremental reload, upgraded to a full one once the full reload interval has passed.
    /// Failures are logged and retried on the next tick.
    pub async fn run(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut last_full = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    tracing::info!("[refresher] exit");
                    return;
                }
                _ = ticker.tick() => {
                    let full = last_full.elapsed() >= self.config.full_reload_interval();
                    let refresher = self.clone();
                    match asyncify(move || refresher.reload(full)).await {
                        Ok(_) if full => last_full = Instant::now(),
                        Ok(_) => {}
                        Err(e) => tracing::debug!("[refresher] tick skipped, full: {full}, error: {e}"),
                    }
                }
            }
        }
    }
}

/// Handle of a spawned refresher task.
#[derive(Debug)]
pub struct RefresherHandle {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl RefresherHandle {
    /// Spawn `refresher` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(refresher: Arc<Refresher>) -> Self {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(refresher.run(stop_rx));
        Self { stop_tx, handle }
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) -> Result<()> {
        // The task may have exited already.
        let _ = self.stop_tx.send(());
        self.handle
            .await
            .map_err(|e| Error::new(ErrorKind::Join, "refresher task failed").with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use locus_cache::status::ServerState;

    use super::*;
    use crate::{
        collaborator::LogAlarm,
        store::{
            memory::{MemoryStore, MemoryTables},
            NodeRow, ServerRow,
        },
        test_utils::{op_total, prometheus_metrics},
    };

    fn refresher_with_metrics(store: Arc<MemoryStore>, config: RegistryConfig, metrics: Metrics) -> Refresher {
        Refresher::new(
            store,
            Arc::new(SnapshotCache::default()),
            Arc::new(StatusTracker::default()),
            Arc::new(LogAlarm),
            Arc::new(metrics),
            config,
        )
    }

    fn refresher(store: Arc<MemoryStore>, config: RegistryConfig) -> Refresher {
        refresher_with_metrics(store, config, Metrics::noop())
    }

    fn no_protect() -> RegistryConfig {
        RegistryConfig {
            recover_protect: false,
            ..Default::default()
        }
    }

    fn tables() -> MemoryTables {
        MemoryTables {
            nodes: vec![
                NodeRow {
                    node_name: "n1".to_string(),
                    present_state: ServerState::Active,
                },
                NodeRow {
                    node_name: "n2".to_string(),
                    present_state: ServerState::Inactive,
                },
            ],
            servers: vec![ServerRow {
                application: "App".to_string(),
                server_name: "Server".to_string(),
                node_name: "n1".to_string(),
                servant: "App.Server.Obj".to_string(),
                endpoint: "tcp -h 10.0.0.1 -p 10000".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_overlapping_reload_is_rejected() {
        let (registry, metrics) = prometheus_metrics();
        // n2 is inactive, half of the fleet
        let refresher = refresher_with_metrics(Arc::new(MemoryStore::new(tables())), no_protect(), metrics);
        let guard = refresher.reload_lock.lock();
        let err = refresher.reload(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReloadInProgress);
        drop(guard);

        let report = refresher.reload(true).unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(op_total(&registry, "reload_rejected"), 1);
        assert_eq!(op_total(&registry, "reload_full"), 1);
    }

    #[test]
    fn test_fleet_check_threshold() {
        // one of two nodes inactive: 50%
        let store = Arc::new(MemoryStore::new(tables()));

        let config = RegistryConfig {
            recover_protect_rate: 50,
            ..Default::default()
        };
        let err = refresher(store.clone(), config).reload(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FleetAnomaly);

        let config = RegistryConfig {
            recover_protect_rate: 51,
            ..Default::default()
        };
        refresher(store.clone(), config).reload(true).unwrap();

        let config = RegistryConfig {
            recover_protect: false,
            recover_protect_rate: 0,
            ..Default::default()
        };
        refresher(store, config).reload(true).unwrap();
    }

    #[test]
    fn test_empty_load_skips_fleet_check() {
        let store = Arc::new(MemoryStore::new(MemoryTables {
            servers: vec![],
            ..tables()
        }));
        let config = RegistryConfig {
            recover_protect_rate: 10,
            ..Default::default()
        };
        refresher(store.clone(), config).reload(true).unwrap();
        assert_eq!(store.calls("query_nodes"), 0);
    }

    #[test]
    fn test_backup_only_servant() {
        let mut tables = tables();
        let backup = ServerRow {
            servant: "App.Server.BakObj".to_string(),
            endpoint: "tcp -h 10.0.0.2 -p 10000".to_string(),
            backup: true,
            ..tables.servers[0].clone()
        };
        tables.servers.push(backup);
        let store = Arc::new(MemoryStore::new(tables));
        let refresher = refresher(store.clone(), no_protect());

        let report = refresher.reload(true).unwrap();
        assert_eq!(report.servants, 1);
        assert!(!refresher.snapshot.read().objects.contains("App.Server.BakObj"));

        // nothing but backups is loaded, so the fleet is never consulted
        store.update(|tables| tables.servers.retain(|row| row.backup));
        let refresher = refresher_with_metrics(store.clone(), RegistryConfig::default(), Metrics::noop());
        let report = refresher.reload(true).unwrap();
        assert_eq!(report.servants, 0);
        assert_eq!(store.calls("query_nodes"), 0);
    }

    #[test]
    fn test_store_failure_keeps_snapshot() {
        let (registry, metrics) = prometheus_metrics();
        let store = Arc::new(MemoryStore::new(tables()));
        let refresher = refresher_with_metrics(store.clone(), no_protect(), metrics);
        refresher.reload(true).unwrap();

        store.fail("query_servers");
        let err = refresher.reload(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(refresher.snapshot.generation(), 1);
        assert!(refresher.snapshot.read().objects.contains("App.Server.Obj"));
        assert_eq!(op_total(&registry, "reload_failed"), 1);
        assert_eq!(op_total(&registry, "reload_protected"), 0);
    }
}
