//! Service status and version derived from member containers

use crate::models::{ContainerHealth, ContainerInfo, ContainerStatus, ServiceStatus};
use regex::Regex;
use std::sync::OnceLock;

static VERSION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn version_pattern() -> &'static Regex {
    VERSION_PATTERN
        .get_or_init(|| Regex::new(r"^v?(\d+(?:\.\d+)*)").expect("Invalid version pattern"))
}

/// Healthy only when every member runs and none reports unhealthy/starting
pub fn service_status(containers: &[&ContainerInfo]) -> ServiceStatus {
    let running = containers
        .iter()
        .filter(|c| c.status == ContainerStatus::Running)
        .count();
    if running == 0 {
        return ServiceStatus::Down;
    }

    let healthy = containers
        .iter()
        .filter(|c| matches!(c.health, None | Some(ContainerHealth::Healthy)))
        .count();
    if running == containers.len() && healthy == containers.len() {
        ServiceStatus::Healthy
    } else {
        ServiceStatus::Degraded
    }
}

/// Tag part of an image reference, if it carries one
///
/// `registry:5000/app` has no tag; the text after its colon is a port path.
fn tag_of(reference: &str) -> Option<&str> {
    let (_, tag) = reference.rsplit_once(':')?;
    if tag.is_empty() || tag.contains('/') || tag == "latest" {
        return None;
    }
    Some(tag)
}

/// Most specific version among the image tags
///
/// Specificity is the number of dot-separated segments; on a tie the
/// earlier tag wins.
pub fn extract_version(image_tags: &[String]) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;

    for tag in image_tags.iter().filter_map(|t| tag_of(t)) {
        let Some(version) = version_pattern()
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            continue;
        };

        let segments = version.split('.').count();
        if best.map_or(true, |(score, _)| segments > score) {
            best = Some((segments, version));
        }
    }

    best.map(|(_, version)| version.to_string())
}
