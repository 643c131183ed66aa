//! Reconciliation scenarios against the in-memory store
//!
//! The snapshot builders here are shared with the unit tests of the
//! grouping, derivation and transition modules.

use super::labels;
use super::ReconciliationEngine;
use crate::models::{
    ActivityType, ContainerEvent, ContainerHealth, ContainerInfo, ContainerStatus, DependencyType,
    ServiceStatus, ServiceType,
};
use crate::store::{ContainerRecord, MemoryStore, ServiceKey, Store};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) fn container(id: &str, name: &str, labels: &[(&str, &str)]) -> ContainerInfo {
    ContainerInfo {
        container_id: id.to_string(),
        name: name.to_string(),
        image: "app:1.0".to_string(),
        image_id: Some(format!("sha256:{id}")),
        image_tags: vec!["app:1.0".to_string()],
        status: ContainerStatus::Running,
        health: None,
        ports: "-".to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        networks: vec!["bridge".to_string()],
        started_at: Some(at(0)),
        exit_code: None,
    }
}

pub(crate) fn container_with_state(
    id: &str,
    status: ContainerStatus,
    health: Option<ContainerHealth>,
) -> ContainerInfo {
    let mut c = container(id, id, &[]);
    c.status = status;
    c.health = health;
    c
}

pub(crate) fn record_of(info: &ContainerInfo) -> ContainerRecord {
    ContainerRecord {
        id: 1,
        server_id: 1,
        container_id: info.container_id.clone(),
        service_id: Some(1),
        name: info.name.clone(),
        image: info.image.clone(),
        image_id: info.image_id.clone(),
        image_tags: info.image_tags.clone(),
        status: info.status,
        health: info.health,
        exit_code: info.exit_code,
        started_at: info.started_at,
        ports: info.ports.clone(),
        labels: info.labels.clone(),
        networks: info.networks.clone(),
    }
}

fn compose(id: &str, project: &str, service: &str, extra: &[(&str, &str)]) -> ContainerInfo {
    let mut pairs = vec![
        (labels::COMPOSE_PROJECT, project),
        (labels::COMPOSE_SERVICE, service),
    ];
    pairs.extend_from_slice(extra);
    container(id, &format!("{project}-{service}-{id}"), &pairs)
}

fn compose_key(project: &str, service: &str) -> ServiceKey {
    ServiceKey::Compose {
        project: project.to_string(),
        service: service.to_string(),
    }
}

fn engine() -> (Arc<MemoryStore>, ReconciliationEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = ReconciliationEngine::new(store.clone(), store.clone());
    (store, engine)
}

/// web -> db (explicit + compose), web -> cache (compose), worker standalone
fn shop_snapshot() -> Vec<ContainerInfo> {
    vec![
        compose("w1", "shop", "web", &[
            (labels::NEON_DEPENDS_ON, "db"),
            (labels::COMPOSE_DEPENDS_ON, "db:service_healthy,cache:service_started"),
            (labels::NEON_TYPE, "website"),
        ]),
        compose("d1", "shop", "db", &[(labels::NEON_NAME, "Orders DB")]),
        compose("c1", "shop", "cache", &[]),
        container("s1", "worker", &[]),
    ]
}

async fn service_id(store: &MemoryStore, key: &ServiceKey) -> i64 {
    store.find_service(1, key).await.unwrap().unwrap().id
}

mod engine_tests {
    use super::*;

    #[tokio::test]
    async fn test_first_sync_builds_topology() {
        let (store, engine) = engine();
        let summary = engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();

        assert_eq!(summary.containers, 4);
        assert_eq!(summary.services, 4);
        assert_eq!(summary.dependencies, 2);
        assert_eq!(summary.restarts, 0);
        assert_eq!(summary.deleted_containers, 0);
        assert_eq!(summary.deleted_services, 0);

        let db = store.find_service(1, &compose_key("shop", "db")).await.unwrap().unwrap();
        assert_eq!(db.attributes.name, "Orders DB");
        assert_eq!(db.attributes.version.as_deref(), Some("1.0"));
        assert_eq!(db.attributes.status, ServiceStatus::Healthy);

        let web = store.find_service(1, &compose_key("shop", "web")).await.unwrap().unwrap();
        assert_eq!(web.attributes.service_type, Some(ServiceType::Website));

        let worker = store
            .find_service(1, &ServiceKey::Standalone { container_id: "s1".into() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.attributes.name, "worker");

        let containers = store.list_containers(1).await.unwrap();
        assert_eq!(containers.len(), 4);
        assert!(containers.iter().all(|c| c.service_id.is_some()));
        assert!(store.activities().await.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_container_id_keeps_first_entry() {
        let (store, engine) = engine();
        // The later entry groups under a key that sorts first
        let snapshot = vec![
            compose("x1", "zeta", "api", &[]),
            compose("x1", "alpha", "api", &[]),
        ];
        let summary = engine.sync(1, "web-1", &snapshot).await.unwrap();

        assert_eq!(summary.containers, 1);
        assert_eq!(summary.services, 1);

        let zeta = service_id(&store, &compose_key("zeta", "api")).await;
        assert!(store
            .find_service(1, &compose_key("alpha", "api"))
            .await
            .unwrap()
            .is_none());

        let containers = store.list_containers(1).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].service_id, Some(zeta));
        assert_eq!(containers[0].name, "zeta-api-x1");
    }

    #[tokio::test]
    async fn test_explicit_dependency_beats_inferred() {
        let (store, engine) = engine();
        engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();

        let web = service_id(&store, &compose_key("shop", "web")).await;
        let db = service_id(&store, &compose_key("shop", "db")).await;
        let cache = service_id(&store, &compose_key("shop", "cache")).await;

        let edges: HashMap<i64, _> = store
            .list_dependencies(1)
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.dependency.depends_on_id, d.dependency))
            .collect();

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[&db].service_id, web);
        assert_eq!(edges[&db].dependency_type, DependencyType::Requires);
        assert!(!edges[&db].inferred);
        assert!(edges[&cache].inferred);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (store, engine) = engine();
        let first = engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();
        let services_before = store.list_services(1).await.unwrap();
        let containers_before = store.list_containers(1).await.unwrap();
        let edges_before: Vec<_> = store
            .list_dependencies(1)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.dependency)
            .collect();

        let second = engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();
        let edges_after: Vec<_> = store
            .list_dependencies(1)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.dependency)
            .collect();

        assert_eq!(first, second);
        assert_eq!(store.list_services(1).await.unwrap(), services_before);
        assert_eq!(store.list_containers(1).await.unwrap(), containers_before);
        assert_eq!(edges_after, edges_before);
        assert!(store.activities().await.is_empty());
    }

    #[tokio::test]
    async fn test_submission_order_keeps_identity() {
        let (store, engine) = engine();
        let mut snapshot = vec![
            compose("a1", "p", "s", &[]),
            compose("a2", "p", "s", &[]),
        ];
        engine.sync(1, "web-1", &snapshot).await.unwrap();
        let before = service_id(&store, &compose_key("p", "s")).await;

        snapshot.reverse();
        let summary = engine.sync(1, "web-1", &snapshot).await.unwrap();
        assert_eq!(summary.services, 1);
        assert_eq!(service_id(&store, &compose_key("p", "s")).await, before);
        assert_eq!(summary.deleted_services, 0);
    }

    #[tokio::test]
    async fn test_transitions_emit_activities() {
        let (store, engine) = engine();
        let snapshot = vec![
            container("a", "alpha", &[]),
            container("b", "bravo", &[]),
            container("c", "charlie", &[]),
            {
                let mut d = container("d", "delta", &[]);
                d.status = ContainerStatus::Exited;
                d.exit_code = Some(0);
                d
            },
        ];
        engine.sync(1, "web-1", &snapshot).await.unwrap();

        let mut next = snapshot.clone();
        next[0].status = ContainerStatus::Exited;
        next[0].exit_code = Some(0);
        next[1].status = ContainerStatus::Exited;
        next[1].exit_code = Some(137);
        next[2].started_at = Some(at(120));
        next[3].status = ContainerStatus::Running;
        next[3].exit_code = None;
        next[3].started_at = Some(at(300));

        let summary = engine.sync(1, "web-1", &next).await.unwrap();
        assert_eq!(summary.restarts, 4);

        let activities = store.activities().await;
        let events: Vec<_> = activities
            .iter()
            .map(|a| (a.activity.message.as_str(), a.activity.event_type))
            .collect();
        assert!(events.contains(&("Container alpha stopped", ContainerEvent::Stopped)));
        assert!(events.contains(&(
            "Container bravo crashed with exit code 137",
            ContainerEvent::Crashed
        )));
        assert!(events.contains(&("Container charlie restarted", ContainerEvent::Restart)));
        assert!(events.contains(&("Container delta was started", ContainerEvent::ManualRestart)));

        let crashed = activities
            .iter()
            .find(|a| a.activity.event_type == ContainerEvent::Crashed)
            .unwrap();
        assert_eq!(crashed.activity.activity_type, ActivityType::Warning);
        assert_eq!(crashed.activity.server_id, 1);
        assert!(crashed.activity.container_id.is_some());

        // Same state again: nothing new
        let summary = engine.sync(1, "web-1", &next).await.unwrap();
        assert_eq!(summary.restarts, 0);
        assert_eq!(store.activities().await.len(), 4);
    }

    #[tokio::test]
    async fn test_new_container_has_no_transition() {
        let (store, engine) = engine();
        let mut fresh = container("n1", "newbie", &[]);
        fresh.status = ContainerStatus::Exited;
        fresh.exit_code = Some(1);

        let summary = engine.sync(1, "web-1", &[fresh]).await.unwrap();
        assert_eq!(summary.restarts, 0);
        assert!(store.activities().await.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_group_is_pruned_without_dangling_edges() {
        let (store, engine) = engine();
        engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();

        let without_db: Vec<_> = shop_snapshot()
            .into_iter()
            .filter(|c| c.container_id != "d1")
            .collect();
        let summary = engine.sync(1, "web-1", &without_db).await.unwrap();

        assert_eq!(summary.deleted_containers, 1);
        assert_eq!(summary.deleted_services, 1);
        assert_eq!(summary.dependencies, 1);
        assert!(store
            .find_service(1, &compose_key("shop", "db"))
            .await
            .unwrap()
            .is_none());

        let live: Vec<i64> = store
            .list_services(1)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        for edge in store.list_dependencies(1).await.unwrap() {
            assert!(live.contains(&edge.dependency.service_id));
            assert!(live.contains(&edge.dependency.depends_on_id));
        }
        assert_eq!(store.list_containers(1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_snapshot_clears_server() {
        let (store, engine) = engine();
        engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();

        let summary = engine.sync(1, "web-1", &[]).await.unwrap();
        assert_eq!(summary.deleted_containers, 4);
        assert_eq!(summary.deleted_services, 4);
        assert!(store.list_services(1).await.unwrap().is_empty());
        assert!(store.list_dependencies(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dependency_prefers_same_project() {
        let (store, engine) = engine();
        let snapshot = vec![
            compose("a1", "alpha", "db", &[]),
            compose("b1", "beta", "db", &[]),
            compose("b2", "beta", "api", &[(labels::NEON_DEPENDS_ON, "db")]),
        ];
        engine.sync(1, "web-1", &snapshot).await.unwrap();

        let api = service_id(&store, &compose_key("beta", "api")).await;
        let beta_db = service_id(&store, &compose_key("beta", "db")).await;
        let edges = store.list_dependencies(1).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dependency.service_id, api);
        assert_eq!(edges[0].dependency.depends_on_id, beta_db);
    }

    #[tokio::test]
    async fn test_self_and_unknown_dependencies_skipped() {
        let (store, engine) = engine();
        let snapshot = vec![compose("a1", "p", "api", &[
            (labels::NEON_DEPENDS_ON, "api, ghost"),
            (labels::NEON_DEPENDS_ON_OPTIONAL, "nowhere"),
        ])];

        let summary = engine.sync(1, "web-1", &snapshot).await.unwrap();
        assert_eq!(summary.dependencies, 0);
        assert!(store.list_dependencies(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_optional_dependency_edge() {
        let (store, engine) = engine();
        let snapshot = vec![
            compose("a1", "p", "api", &[(labels::NEON_DEPENDS_ON_OPTIONAL, "search")]),
            compose("s1", "p", "search", &[]),
        ];
        engine.sync(1, "web-1", &snapshot).await.unwrap();

        let edges = store.list_dependencies(1).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dependency.dependency_type, DependencyType::Optional);
        assert!(!edges[0].dependency.inferred);
    }

    #[tokio::test]
    async fn test_degraded_service_status() {
        let (store, engine) = engine();
        let mut sick = compose("a2", "p", "api", &[]);
        sick.health = Some(ContainerHealth::Unhealthy);
        let snapshot = vec![compose("a1", "p", "api", &[]), sick];

        engine.sync(1, "web-1", &snapshot).await.unwrap();
        let api = store.find_service(1, &compose_key("p", "api")).await.unwrap().unwrap();
        assert_eq!(api.attributes.status, ServiceStatus::Degraded);
    }

    #[tokio::test]
    async fn test_servers_are_isolated() {
        let (store, engine) = engine();
        engine.sync(1, "web-1", &shop_snapshot()).await.unwrap();
        engine.sync(2, "web-2", &shop_snapshot()).await.unwrap();

        engine.sync(2, "web-2", &[]).await.unwrap();
        assert_eq!(store.list_services(1).await.unwrap().len(), 4);
        assert_eq!(store.list_dependencies(1).await.unwrap().len(), 2);
        assert!(store.list_services(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_syncs_leave_consistent_state() {
        let (store, engine) = engine();
        let engine = Arc::new(engine);
        let snapshot = shop_snapshot();

        let (a, b) = tokio::join!(
            engine.sync(1, "web-1", &snapshot),
            engine.sync(1, "web-1", &snapshot)
        );
        assert_eq!(a.unwrap().services, 4);
        assert_eq!(b.unwrap().services, 4);

        assert_eq!(store.list_services(1).await.unwrap().len(), 4);
        assert_eq!(store.list_containers(1).await.unwrap().len(), 4);
        assert_eq!(store.list_dependencies(1).await.unwrap().len(), 2);
    }
}
