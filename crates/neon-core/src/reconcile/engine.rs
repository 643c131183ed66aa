//! Per-server container reconciliation
//!
//! Each sync replaces the server's stored topology with the one derived
//! from the snapshot:
//! 1. Upsert one service per group, tracking the active ids
//! 2. Detect transitions against the stored container row, then upsert it
//! 3. Rebuild every dependency edge of the server
//! 4. Prune containers absent from the snapshot
//! 5. Prune services whose group disappeared
//!
//! A failure part-way leaves earlier steps committed; the next sync heals
//! the rest because every step is derived from the snapshot alone.

use super::derive::{extract_version, service_status};
use super::grouping::{group_containers, ServiceGroup};
use super::transitions::{activity_for, detect_transition};
use crate::models::{ContainerInfo, DependencyType, SyncSummary};
use crate::observability::{MasterMetrics, StructuredLogger};
use crate::store::{
    ActivityLog, ContainerRecord, NewDependency, ServiceAttributes, ServiceKey, Store, StoreError,
};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    activities: Arc<dyn ActivityLog>,
    /// Serializes overlapping syncs of one server
    locks: DashMap<i64, Arc<Mutex<()>>>,
    metrics: MasterMetrics,
    logger: StructuredLogger,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn Store>, activities: Arc<dyn ActivityLog>) -> Self {
        Self {
            store,
            activities,
            locks: DashMap::new(),
            metrics: MasterMetrics::new(),
            logger: StructuredLogger::new("neon-master"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    fn lock_for(&self, server_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(server_id).or_default().clone()
    }

    pub async fn sync(
        &self,
        server_id: i64,
        server_name: &str,
        containers: &[ContainerInfo],
    ) -> Result<SyncSummary, StoreError> {
        let lock = self.lock_for(server_id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let snapshot = first_occurrences(containers);
        debug!(
            server_id = server_id,
            server_name = %server_name,
            containers = snapshot.len(),
            duplicates = containers.len() - snapshot.len(),
            "Reconciling container snapshot"
        );

        let prior: HashMap<String, ContainerRecord> = self
            .store
            .list_containers(server_id)
            .await?
            .into_iter()
            .map(|c| (c.container_id.clone(), c))
            .collect();

        let groups = group_containers(&snapshot);
        let mut summary = SyncSummary {
            containers: snapshot.len(),
            services: groups.len(),
            ..SyncSummary::default()
        };

        let mut service_ids: BTreeMap<&ServiceKey, i64> = BTreeMap::new();

        for (key, group) in &groups {
            let service_id = self.upsert_service(server_id, group).await?;
            service_ids.insert(key, service_id);

            for container in &group.containers {
                if let Some(prior) = prior.get(&container.container_id) {
                    if let Some(event) = detect_transition(prior, container) {
                        let activity =
                            activity_for(event, server_id, prior, container, Some(service_id));
                        self.activities.record(activity).await?;
                        self.metrics.inc_activity(event.as_str());
                        summary.restarts += 1;
                    }
                }

                self.store
                    .upsert_container(server_id, service_id, container)
                    .await?;
            }
        }

        summary.dependencies = self
            .rebuild_dependencies(server_id, &groups, &service_ids)
            .await?;

        let keep: HashSet<String> = snapshot.iter().map(|c| c.container_id.clone()).collect();
        summary.deleted_containers = self.store.delete_containers_except(server_id, &keep).await?;

        let active: HashSet<i64> = service_ids.values().copied().collect();
        summary.deleted_services = self.store.delete_services_except(server_id, &active).await?;

        self.metrics
            .observe_sync_latency(started.elapsed().as_secs_f64());
        self.logger.log_sync(
            server_id,
            summary.containers,
            summary.services,
            summary.dependencies,
            summary.restarts,
            summary.deleted_containers,
            summary.deleted_services,
        );

        Ok(summary)
    }

    async fn upsert_service(
        &self,
        server_id: i64,
        group: &ServiceGroup<'_>,
    ) -> Result<i64, StoreError> {
        let attributes = ServiceAttributes {
            name: group.name.clone(),
            description: group.description.clone(),
            service_type: group.service_type,
            version: group.primary().and_then(|c| extract_version(&c.image_tags)),
            status: service_status(&group.containers),
        };

        let service = match self.store.find_service(server_id, &group.key).await? {
            Some(existing) => self.store.update_service(existing.id, &attributes).await?,
            None => {
                self.store
                    .create_service(server_id, &group.key, &attributes)
                    .await?
            }
        };
        Ok(service.id)
    }

    /// Replace all edges of the server; returns how many were created
    async fn rebuild_dependencies(
        &self,
        server_id: i64,
        groups: &BTreeMap<ServiceKey, ServiceGroup<'_>>,
        service_ids: &BTreeMap<&ServiceKey, i64>,
    ) -> Result<usize, StoreError> {
        self.store.delete_dependencies(server_id).await?;

        let resolver = Resolver::new(service_ids);
        let mut created: HashSet<(i64, i64)> = HashSet::new();

        for (key, group) in groups {
            let Some(&from) = service_ids.get(key) else {
                continue;
            };

            let required = group
                .depends_on
                .iter()
                .map(|d| (d, DependencyType::Requires, group.is_inferred(d)));
            let optional = group
                .depends_on_optional
                .iter()
                .map(|d| (d, DependencyType::Optional, false));

            for (name, dependency_type, inferred) in required.chain(optional) {
                let Some(to) = resolver.resolve(name, key.compose_project()) else {
                    debug!(server_id = server_id, dependency = %name, "Unresolved dependency");
                    continue;
                };
                if to == from || !created.insert((from, to)) {
                    continue;
                }

                self.store
                    .create_dependency(NewDependency {
                        service_id: from,
                        depends_on_id: to,
                        dependency_type,
                        inferred,
                    })
                    .await?;
            }
        }

        Ok(created.len())
    }
}

/// Compose service name -> service id within one sync batch
struct Resolver<'a> {
    /// Candidates in key order, so the fallback does not depend on snapshot order
    by_service: HashMap<&'a str, Vec<(&'a str, i64)>>,
}

impl<'a> Resolver<'a> {
    fn new(service_ids: &BTreeMap<&'a ServiceKey, i64>) -> Self {
        let mut by_service: HashMap<&'a str, Vec<(&'a str, i64)>> = HashMap::new();
        for (key, &id) in service_ids {
            if let ServiceKey::Compose { project, service } = *key {
                by_service
                    .entry(service.as_str())
                    .or_default()
                    .push((project.as_str(), id));
            }
        }
        Self { by_service }
    }

    /// Prefer a service of the same compose project as the dependent
    fn resolve(&self, name: &str, project: Option<&str>) -> Option<i64> {
        let candidates = self.by_service.get(name)?;
        candidates
            .iter()
            .find(|(p, _)| Some(*p) == project)
            .or_else(|| candidates.first())
            .map(|(_, id)| *id)
    }
}

/// Keep the first entry for each container id, in snapshot order
fn first_occurrences(containers: &[ContainerInfo]) -> Vec<ContainerInfo> {
    let mut seen = HashSet::new();
    containers
        .iter()
        .filter(|c| seen.insert(c.container_id.as_str()))
        .cloned()
        .collect()
}
