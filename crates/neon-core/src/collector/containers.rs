//! Container inventory collection
//!
//! Lists every container through the runtime, inspects each one for state
//! details and resolves image tags once per distinct image.

use super::{CollectorError, ContainerRuntime, RuntimePort};
use crate::models::{ContainerInfo, ContainerStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

const SHORT_ID_LEN: usize = 12;

/// Timestamp prefix the runtime reports for containers that never started
const ZERO_TIMESTAMP_PREFIX: &str = "0001-01-01";

/// Collect the full container snapshot for this host
pub async fn collect_containers(
    runtime: &dyn ContainerRuntime,
) -> Result<Vec<ContainerInfo>, CollectorError> {
    let listed = runtime.list_containers().await?;

    let mut image_tags: HashMap<String, Vec<String>> = HashMap::new();
    for image_id in listed.iter().filter_map(|c| c.image_id.as_deref()) {
        if image_tags.contains_key(image_id) {
            continue;
        }
        let tags = match runtime.image_tags(image_id).await {
            Ok(tags) => tags,
            Err(e) => {
                debug!(image_id = %image_id, error = %e, "Failed to inspect image");
                Vec::new()
            }
        };
        image_tags.insert(image_id.to_string(), tags);
    }

    let mut containers = Vec::with_capacity(listed.len());
    for container in listed {
        let state = match runtime.inspect_container(&container.id).await {
            Ok(state) => state,
            Err(e) => {
                debug!(container_id = %container.id, error = %e, "Failed to inspect container");
                Default::default()
            }
        };

        let name = container
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let tags = container
            .image_id
            .as_deref()
            .and_then(|id| image_tags.get(id))
            .cloned()
            .unwrap_or_default();

        containers.push(ContainerInfo {
            container_id: short_id(&container.id),
            name,
            image: container.image,
            image_id: container.image_id,
            image_tags: tags,
            status: ContainerStatus::from_runtime_state(&container.state),
            health: state.health,
            ports: format_ports(&container.ports),
            labels: container.labels,
            networks: container.networks,
            started_at: state.started_at.as_deref().and_then(parse_started_at),
            exit_code: state.exit_code,
        });
    }

    Ok(containers)
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Format published ports as `public:private` (or `private`), `-` when none
pub fn format_ports(ports: &[RuntimePort]) -> String {
    let formatted: Vec<String> = ports
        .iter()
        .filter(|p| p.private_port != 0)
        .map(|p| match p.public_port {
            Some(public) if public != 0 => format!("{}:{}", public, p.private_port),
            _ => p.private_port.to_string(),
        })
        .collect();

    if formatted.is_empty() {
        "-".to_string()
    } else {
        formatted.join(", ")
    }
}

/// Parse an inspect `StartedAt` value, mapping the never-started sentinel to `None`
pub fn parse_started_at(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || raw.starts_with(ZERO_TIMESTAMP_PREFIX) {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ports() {
        assert_eq!(format_ports(&[]), "-");

        let ports = [
            RuntimePort {
                private_port: 80,
                public_port: Some(8080),
            },
            RuntimePort {
                private_port: 443,
                public_port: None,
            },
        ];
        assert_eq!(format_ports(&ports), "8080:80, 443");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_parse_started_at() {
        assert!(parse_started_at("0001-01-01T00:00:00Z").is_none());
        assert!(parse_started_at("").is_none());
        assert!(parse_started_at("garbage").is_none());

        let ts = parse_started_at("2024-05-01T10:00:00.123456789Z").unwrap();
        assert_eq!(ts.timestamp(), 1714557600);
    }
}
