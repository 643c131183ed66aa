//! Fold a container snapshot into service groups

use super::labels;
use crate::models::{ContainerInfo, ServiceType};
use crate::store::ServiceKey;
use std::collections::BTreeMap;

/// Containers sharing one service identity, with their merged labels
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceGroup<'a> {
    pub key: ServiceKey,
    pub name: String,
    pub description: Option<String>,
    pub service_type: Option<ServiceType>,
    /// Snapshot order; the first entry is the primary container
    pub containers: Vec<&'a ContainerInfo>,
    /// Required dependencies by compose service name, explicit and inferred
    pub depends_on: Vec<String>,
    pub depends_on_optional: Vec<String>,
    /// Subset of `depends_on` named in an explicit required label
    pub explicit_depends_on: Vec<String>,
    name_overridden: bool,
}

impl<'a> ServiceGroup<'a> {
    fn open(key: ServiceKey, default_name: String) -> Self {
        Self {
            key,
            name: default_name,
            description: None,
            service_type: None,
            containers: Vec::new(),
            depends_on: Vec::new(),
            depends_on_optional: Vec::new(),
            explicit_depends_on: Vec::new(),
            name_overridden: false,
        }
    }

    pub fn compose_project(&self) -> Option<&str> {
        self.key.compose_project()
    }

    pub fn compose_service(&self) -> Option<&str> {
        self.key.compose_service()
    }

    pub fn primary(&self) -> Option<&'a ContainerInfo> {
        self.containers.first().copied()
    }

    /// True when the dependency was not named in an explicit required label
    pub fn is_inferred(&self, dependency: &str) -> bool {
        !self.explicit_depends_on.iter().any(|d| d == dependency)
    }

    fn absorb(&mut self, container: &'a ContainerInfo) {
        if !self.name_overridden {
            if let Some(name) = container.label(labels::NEON_NAME) {
                self.name = name.to_string();
                self.name_overridden = true;
            }
        }
        if self.description.is_none() {
            self.description = container.label(labels::NEON_DESCRIPTION).map(String::from);
        }
        if self.service_type.is_none() {
            self.service_type = container
                .label(labels::NEON_TYPE)
                .and_then(ServiceType::parse);
        }

        let explicit = labels::parse_list(container.label(labels::NEON_DEPENDS_ON));
        let inferred = labels::parse_compose_depends_on(container.label(labels::COMPOSE_DEPENDS_ON));
        let optional = labels::parse_list(container.label(labels::NEON_DEPENDS_ON_OPTIONAL));

        union_into(&mut self.explicit_depends_on, explicit.iter().cloned());
        union_into(&mut self.depends_on, explicit.into_iter().chain(inferred));
        union_into(&mut self.depends_on_optional, optional);

        self.containers.push(container);
    }
}

fn union_into(target: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Grouping key and default display name for one container
pub fn service_key(container: &ContainerInfo) -> (ServiceKey, String) {
    match (
        container.label(labels::COMPOSE_PROJECT),
        container.label(labels::COMPOSE_SERVICE),
    ) {
        (Some(project), Some(service)) => (
            ServiceKey::Compose {
                project: project.to_string(),
                service: service.to_string(),
            },
            service.to_string(),
        ),
        _ => (
            ServiceKey::Standalone {
                container_id: container.container_id.clone(),
            },
            container.name.clone(),
        ),
    }
}

/// Group a snapshot by service key
///
/// Name, description and type are first-non-empty-wins across the
/// containers of a group; dependency lists are order-preserving unions.
/// A name listed as both required and optional stays required only.
pub fn group_containers(containers: &[ContainerInfo]) -> BTreeMap<ServiceKey, ServiceGroup<'_>> {
    let mut groups = containers
        .iter()
        .fold(BTreeMap::<ServiceKey, ServiceGroup>::new(), |mut groups, container| {
            let (key, default_name) = service_key(container);
            groups
                .entry(key.clone())
                .or_insert_with(|| ServiceGroup::open(key, default_name))
                .absorb(container);
            groups
        });

    for group in groups.values_mut() {
        let required = group.depends_on.clone();
        group.depends_on_optional.retain(|d| !required.contains(d));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::container;

    #[test]
    fn test_compose_containers_share_a_group() {
        let snapshot = vec![
            container("a1", "shop-api-1", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "api"),
            ]),
            container("a2", "shop-api-2", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "api"),
            ]),
            container("s1", "scratch", &[]),
        ];

        let groups = group_containers(&snapshot);
        assert_eq!(groups.len(), 2);

        let api = &groups[&ServiceKey::Compose {
            project: "shop".into(),
            service: "api".into(),
        }];
        assert_eq!(api.name, "api");
        assert_eq!(api.containers.len(), 2);
        assert_eq!(api.primary().map(|c| c.container_id.as_str()), Some("a1"));

        let scratch = &groups[&ServiceKey::Standalone {
            container_id: "s1".into(),
        }];
        assert_eq!(scratch.name, "scratch");
    }

    #[test]
    fn test_project_without_service_is_standalone() {
        let snapshot = vec![container("x1", "odd", &[(labels::COMPOSE_PROJECT, "shop")])];
        let groups = group_containers(&snapshot);
        assert!(groups.contains_key(&ServiceKey::Standalone {
            container_id: "x1".into()
        }));
    }

    #[test]
    fn test_first_non_empty_override_wins() {
        let snapshot = vec![
            container("a1", "a1", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "db"),
                (labels::NEON_NAME, ""),
                (labels::NEON_TYPE, "cache"),
            ]),
            container("a2", "a2", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "db"),
                (labels::NEON_NAME, "Orders DB"),
                (labels::NEON_TYPE, "Database"),
                (labels::NEON_DESCRIPTION, "primary store"),
            ]),
            container("a3", "a3", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "db"),
                (labels::NEON_NAME, "Ignored"),
                (labels::NEON_TYPE, "website"),
            ]),
        ];

        let groups = group_containers(&snapshot);
        let db = groups.values().next().unwrap();
        assert_eq!(db.name, "Orders DB");
        assert_eq!(db.service_type, Some(ServiceType::Database));
        assert_eq!(db.description.as_deref(), Some("primary store"));
    }

    #[test]
    fn test_dependency_union_and_inference() {
        let snapshot = vec![
            container("w1", "web-1", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "web"),
                (labels::NEON_DEPENDS_ON, "db"),
                (labels::COMPOSE_DEPENDS_ON, "db:service_healthy,cache:service_started"),
                (labels::NEON_DEPENDS_ON_OPTIONAL, "cache, metrics"),
            ]),
            container("w2", "web-2", &[
                (labels::COMPOSE_PROJECT, "shop"),
                (labels::COMPOSE_SERVICE, "web"),
                (labels::COMPOSE_DEPENDS_ON, "queue:service_started"),
            ]),
        ];

        let groups = group_containers(&snapshot);
        let web = groups.values().next().unwrap();
        assert_eq!(web.depends_on, vec!["db", "cache", "queue"]);
        assert_eq!(web.depends_on_optional, vec!["metrics"]);
        assert!(!web.is_inferred("db"));
        assert!(web.is_inferred("cache"));
        assert!(web.is_inferred("queue"));
    }

    #[test]
    fn test_grouping_ignores_submission_order() {
        let a = container("a1", "one", &[
            (labels::COMPOSE_PROJECT, "p"),
            (labels::COMPOSE_SERVICE, "s"),
        ]);
        let b = container("b1", "two", &[
            (labels::COMPOSE_PROJECT, "p"),
            (labels::COMPOSE_SERVICE, "s"),
        ]);

        let forward = vec![a.clone(), b.clone()];
        let backward = vec![b, a];
        let keys_forward: Vec<_> = group_containers(&forward).into_keys().collect();
        let keys_backward: Vec<_> = group_containers(&backward).into_keys().collect();
        assert_eq!(keys_forward, keys_backward);
        assert_eq!(keys_forward.len(), 1);
    }
}
