//! In-memory store
//!
//! Everything lives behind one `RwLock`, so each trait call is atomic on
//! its own. Row ids are assigned from a single counter.

use super::{
    ActivityLog, ActivityRecord, ContainerRecord, DependencyRecord, NewActivity, NewDependency,
    ServerRecord, ServerStatus, ServiceAttributes, ServiceKey, ServiceRecord, Store, StoreError,
};
use crate::models::{ContainerInfo, ServerInfo, ServerMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: i64,
    servers: BTreeMap<i64, ServerRecord>,
    /// Samples per server, keyed by timestamp
    metrics: HashMap<i64, BTreeMap<DateTime<Utc>, ServerMetrics>>,
    services: BTreeMap<i64, ServiceRecord>,
    /// (server id, container id) -> record
    containers: BTreeMap<(i64, String), ContainerRecord>,
    dependencies: BTreeMap<i64, DependencyRecord>,
    activities: Vec<ActivityRecord>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn server_mut(&mut self, server_id: i64) -> Result<&mut ServerRecord, StoreError> {
        self.servers
            .get_mut(&server_id)
            .ok_or_else(|| StoreError::NotFound(format!("server {server_id}")))
    }

    fn service_ids(&self, server_id: i64) -> HashSet<i64> {
        self.services
            .values()
            .filter(|s| s.server_id == server_id)
            .map(|s| s.id)
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn activities(&self) -> Vec<ActivityRecord> {
        self.inner.read().await.activities.clone()
    }

    pub async fn metrics(&self, server_id: i64) -> Vec<ServerMetrics> {
        self.inner
            .read()
            .await
            .metrics
            .get(&server_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_server(
        &self,
        name: &str,
        info: &ServerInfo,
        agent_version: &str,
    ) -> Result<ServerRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(server) = inner.servers.values_mut().find(|s| s.name == name) {
            server.info = info.clone();
            server.agent_version = agent_version.to_string();
            server.status = ServerStatus::Online;
            server.last_seen_at = Some(now);
            return Ok(server.clone());
        }

        let id = inner.next_id();
        let server = ServerRecord {
            id,
            name: name.to_string(),
            info: info.clone(),
            agent_version: agent_version.to_string(),
            status: ServerStatus::Online,
            last_seen_at: Some(now),
            last_metrics_at: None,
            cpu_percent: None,
            memory_percent: None,
            disk_percent: None,
        };
        inner.servers.insert(id, server.clone());
        Ok(server)
    }

    async fn get_server(&self, server_id: i64) -> Result<Option<ServerRecord>, StoreError> {
        Ok(self.inner.read().await.servers.get(&server_id).cloned())
    }

    async fn mark_server_online(
        &self,
        server_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let server = inner.server_mut(server_id)?;
        server.status = ServerStatus::Online;
        server.last_seen_at = Some(at);
        Ok(())
    }

    async fn insert_metrics(
        &self,
        server_id: i64,
        samples: &[ServerMetrics],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        inner.server_mut(server_id)?;

        let series = inner.metrics.entry(server_id).or_default();
        let mut inserted = 0;
        for sample in samples {
            if !series.contains_key(&sample.timestamp) {
                series.insert(sample.timestamp, sample.clone());
                inserted += 1;
            }
        }

        if let Some(last) = samples.last() {
            let server = inner.server_mut(server_id)?;
            server.cpu_percent = Some(last.cpu_percent);
            server.memory_percent = Some(last.memory_percent);
            server.disk_percent = Some(last.disk_percent);
            server.last_metrics_at = Some(last.timestamp);
            server.status = ServerStatus::Online;
            server.last_seen_at = Some(Utc::now());
        }
        Ok(inserted)
    }

    async fn find_service(
        &self,
        server_id: i64,
        key: &ServiceKey,
    ) -> Result<Option<ServiceRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .services
            .values()
            .find(|s| s.server_id == server_id && &s.key == key)
            .cloned())
    }

    async fn create_service(
        &self,
        server_id: i64,
        key: &ServiceKey,
        attributes: &ServiceAttributes,
    ) -> Result<ServiceRecord, StoreError> {
        let mut inner = self.inner.write().await;
        if inner
            .services
            .values()
            .any(|s| s.server_id == server_id && &s.key == key)
        {
            return Err(StoreError::Conflict(format!(
                "service {key:?} already exists on server {server_id}"
            )));
        }

        let id = inner.next_id();
        let service = ServiceRecord {
            id,
            server_id,
            key: key.clone(),
            attributes: attributes.clone(),
        };
        inner.services.insert(id, service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        service_id: i64,
        attributes: &ServiceAttributes,
    ) -> Result<ServiceRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let service = inner
            .services
            .get_mut(&service_id)
            .ok_or_else(|| StoreError::NotFound(format!("service {service_id}")))?;
        service.attributes = attributes.clone();
        Ok(service.clone())
    }

    async fn list_services(&self, server_id: i64) -> Result<Vec<ServiceRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .services
            .values()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn delete_services_except(
        &self,
        server_id: i64,
        keep: &HashSet<i64>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let doomed: HashSet<i64> = inner
            .service_ids(server_id)
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        inner.services.retain(|id, _| !doomed.contains(id));
        inner.dependencies.retain(|_, d| {
            !doomed.contains(&d.dependency.service_id)
                && !doomed.contains(&d.dependency.depends_on_id)
        });
        for container in inner.containers.values_mut() {
            if container.service_id.is_some_and(|id| doomed.contains(&id)) {
                container.service_id = None;
            }
        }
        Ok(doomed.len())
    }

    async fn list_containers(&self, server_id: i64) -> Result<Vec<ContainerRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .containers
            .values()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn upsert_container(
        &self,
        server_id: i64,
        service_id: i64,
        container: &ContainerInfo,
    ) -> Result<ContainerRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (server_id, container.container_id.clone());
        let id = match inner.containers.get(&key) {
            Some(existing) => existing.id,
            None => inner.next_id(),
        };

        let record = ContainerRecord {
            id,
            server_id,
            container_id: container.container_id.clone(),
            service_id: Some(service_id),
            name: container.name.clone(),
            image: container.image.clone(),
            image_id: container.image_id.clone(),
            image_tags: container.image_tags.clone(),
            status: container.status,
            health: container.health,
            exit_code: container.exit_code,
            started_at: container.started_at,
            ports: container.ports.clone(),
            labels: container.labels.clone(),
            networks: container.networks.clone(),
        };
        inner.containers.insert(key, record.clone());
        Ok(record)
    }

    async fn delete_containers_except(
        &self,
        server_id: i64,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.containers.len();
        inner
            .containers
            .retain(|(sid, cid), _| *sid != server_id || keep.contains(cid));
        Ok(before - inner.containers.len())
    }

    async fn delete_dependencies(&self, server_id: i64) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let owned = inner.service_ids(server_id);
        let before = inner.dependencies.len();
        inner
            .dependencies
            .retain(|_, d| !owned.contains(&d.dependency.service_id));
        Ok(before - inner.dependencies.len())
    }

    async fn create_dependency(
        &self,
        dependency: NewDependency,
    ) -> Result<DependencyRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let (Some(from), Some(to)) = (
            inner.services.get(&dependency.service_id),
            inner.services.get(&dependency.depends_on_id),
        ) else {
            return Err(StoreError::NotFound(format!(
                "service {} or {}",
                dependency.service_id, dependency.depends_on_id
            )));
        };
        if from.server_id != to.server_id {
            return Err(StoreError::Conflict(
                "dependency crosses servers".to_string(),
            ));
        }
        if from.id == to.id {
            return Err(StoreError::Conflict(
                "service cannot depend on itself".to_string(),
            ));
        }

        let id = inner.next_id();
        let record = DependencyRecord { id, dependency };
        inner.dependencies.insert(id, record.clone());
        Ok(record)
    }

    async fn list_dependencies(
        &self,
        server_id: i64,
    ) -> Result<Vec<DependencyRecord>, StoreError> {
        let inner = self.inner.read().await;
        let owned = inner.service_ids(server_id);
        Ok(inner
            .dependencies
            .values()
            .filter(|d| owned.contains(&d.dependency.service_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn record(&self, activity: NewActivity) -> Result<ActivityRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        let record = ActivityRecord {
            id,
            created_at: Utc::now(),
            activity,
        };
        inner.activities.push(record.clone());
        Ok(record)
    }
}
