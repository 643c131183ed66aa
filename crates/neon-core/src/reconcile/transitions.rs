//! Lifecycle transitions between the stored and the reported container state

use crate::models::{ContainerEvent, ContainerInfo, ContainerStatus};
use crate::store::{ContainerRecord, NewActivity};
use serde_json::json;

pub const ENTITY_CONTAINER: &str = "container";

/// Compare the stored row with the incoming observation
///
/// Stop/crash and the two restart kinds are mutually exclusive: the former
/// need an exited container, the latter a running one.
pub fn detect_transition(prior: &ContainerRecord, incoming: &ContainerInfo) -> Option<ContainerEvent> {
    let was_running = prior.status == ContainerStatus::Running;
    let is_running = incoming.status == ContainerStatus::Running;

    if was_running && incoming.status == ContainerStatus::Exited {
        return Some(match incoming.exit_code {
            Some(0) => ContainerEvent::Stopped,
            _ => ContainerEvent::Crashed,
        });
    }

    let restarted = matches!(
        (prior.started_at, incoming.started_at),
        (Some(before), Some(after)) if before != after
    );
    if !restarted || !is_running {
        return None;
    }

    match prior.status {
        ContainerStatus::Running => Some(ContainerEvent::Restart),
        ContainerStatus::Exited => Some(ContainerEvent::ManualRestart),
        _ => None,
    }
}

/// Activity row describing a detected transition
pub fn activity_for(
    event: ContainerEvent,
    server_id: i64,
    prior: &ContainerRecord,
    incoming: &ContainerInfo,
    service_id: Option<i64>,
) -> NewActivity {
    let name = &incoming.name;
    let (message, metadata) = match event {
        ContainerEvent::Stopped => (
            format!("Container {name} stopped"),
            json!({ "exitCode": incoming.exit_code }),
        ),
        ContainerEvent::Crashed => (
            match incoming.exit_code {
                Some(code) => format!("Container {name} crashed with exit code {code}"),
                None => format!("Container {name} crashed with an unknown exit code"),
            },
            json!({ "exitCode": incoming.exit_code }),
        ),
        ContainerEvent::Restart | ContainerEvent::ManualRestart => (
            if event == ContainerEvent::Restart {
                format!("Container {name} restarted")
            } else {
                format!("Container {name} was started")
            },
            json!({
                "previousStartedAt": prior.started_at,
                "newStartedAt": incoming.started_at,
            }),
        ),
    };

    NewActivity {
        activity_type: event.activity_type(),
        entity_type: ENTITY_CONTAINER.to_string(),
        event_type: event,
        message,
        server_id,
        container_id: Some(prior.id),
        service_id,
        metadata,
    }
}
