//! Docker implementation of the container runtime capability

use super::{
    async_trait, CollectorError, ContainerRuntime, HostOsInfo, RuntimeContainer, RuntimePort,
    RuntimeState,
};
use crate::models::ContainerHealth;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::HealthStatusEnum;
use bollard::Docker;
use tracing::info;

/// Container runtime backed by the local Docker engine
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket or named pipe, honouring `DOCKER_HOST`)
    pub fn connect() -> Result<Self, CollectorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| CollectorError::RuntimeUnavailable(e.to_string()))?;
        info!("Docker client configured");
        Ok(Self { docker })
    }
}

fn runtime_err(e: bollard::errors::Error) -> CollectorError {
    CollectorError::Runtime(e.to_string())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), CollectorError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| CollectorError::RuntimeUnavailable(e.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<RuntimeContainer>, CollectorError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(runtime_err)?;

        Ok(summaries
            .into_iter()
            .map(|s| RuntimeContainer {
                id: s.id.unwrap_or_default(),
                names: s.names.unwrap_or_default(),
                image: s.image.unwrap_or_default(),
                image_id: s.image_id.filter(|id| !id.is_empty()),
                state: s.state.unwrap_or_default(),
                ports: s
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| RuntimePort {
                        private_port: p.private_port,
                        public_port: p.public_port,
                    })
                    .collect(),
                labels: s.labels.unwrap_or_default(),
                networks: s
                    .network_settings
                    .and_then(|n| n.networks)
                    .map(|n| n.into_keys().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<RuntimeState, CollectorError> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_err)?;

        let Some(state) = details.state else {
            return Ok(RuntimeState::default());
        };

        let health = state
            .health
            .and_then(|h| h.status)
            .and_then(|status| match status {
                HealthStatusEnum::HEALTHY => Some(ContainerHealth::Healthy),
                HealthStatusEnum::UNHEALTHY => Some(ContainerHealth::Unhealthy),
                HealthStatusEnum::STARTING => Some(ContainerHealth::Starting),
                _ => None,
            });

        Ok(RuntimeState {
            started_at: state.started_at,
            exit_code: state.exit_code,
            health,
        })
    }

    async fn image_tags(&self, image_id: &str) -> Result<Vec<String>, CollectorError> {
        let image = self
            .docker
            .inspect_image(image_id)
            .await
            .map_err(runtime_err)?;
        Ok(image.repo_tags.unwrap_or_default())
    }

    async fn host_info(&self) -> Result<HostOsInfo, CollectorError> {
        let info = self.docker.info().await.map_err(runtime_err)?;
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Unknown".to_string());
        Ok(HostOsInfo {
            os_name: or_unknown(info.operating_system),
            os_kernel: or_unknown(info.kernel_version),
            os_arch: or_unknown(info.architecture),
            docker_version: or_unknown(info.server_version),
        })
    }
}
