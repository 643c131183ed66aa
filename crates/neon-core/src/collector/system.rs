//! Host sampling through sysinfo

use super::{async_trait, CollectorError, ContainerRuntime, MetricSampler};
use crate::models::{round2, ServerInfo, ServerMetrics};
use std::sync::Arc;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tokio::sync::Mutex;
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Used/total space of one mounted disk, in bytes
#[derive(Debug, Clone, Copy)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Sum disks into (used GB, total GB, used percent)
pub fn summarize_disks(disks: &[DiskUsage]) -> (f64, f64, f64) {
    let total: u64 = disks.iter().map(|d| d.total_bytes).sum();
    let used: u64 = disks
        .iter()
        .map(|d| d.total_bytes.saturating_sub(d.available_bytes))
        .sum();

    let percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    (used as f64 / BYTES_PER_GB, total as f64 / BYTES_PER_GB, percent)
}

/// Counters of the first interface with traffic, else the first interface, else zeros
pub fn pick_interface_counters<I>(interfaces: I) -> (u64, u64)
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut first = None;
    for (rx, tx) in interfaces {
        if rx > 0 || tx > 0 {
            return (rx, tx);
        }
        first.get_or_insert((rx, tx));
    }
    first.unwrap_or((0, 0))
}

/// Sampler over the local host
///
/// The `System` handle is kept between samples so CPU usage is measured
/// over the interval since the previous refresh.
pub struct SystemSampler {
    system: Mutex<System>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
            runtime: None,
        }
    }

    /// Use the container engine's view of the host OS when it is reachable
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn disk_usage(system: &System) -> Vec<DiskUsage> {
        system
            .disks()
            .iter()
            .map(|d| DiskUsage {
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .collect()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSampler for SystemSampler {
    async fn server_info(&self, server_name: &str) -> Result<ServerInfo, CollectorError> {
        let host_os = match &self.runtime {
            Some(runtime) => match runtime.host_info().await {
                Ok(info) => Some(info),
                Err(e) => {
                    debug!(error = %e, "Runtime host info unavailable, using local OS info");
                    None
                }
            },
            None => None,
        };

        let mut system = self.system.lock().await;
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();

        let (_, total_disk_gb, _) = summarize_disks(&Self::disk_usage(&system));
        let cpu_cores = system
            .physical_core_count()
            .unwrap_or_else(|| system.cpus().len()) as u32;

        let local_os_name = system
            .long_os_version()
            .or_else(|| system.name())
            .unwrap_or_else(|| "Unknown".to_string());
        let local_kernel = system
            .kernel_version()
            .unwrap_or_else(|| "Unknown".to_string());

        let (os_name, os_kernel, os_arch, docker_version) = match host_os {
            Some(h) => (h.os_name, h.os_kernel, h.os_arch, Some(h.docker_version)),
            None => (
                local_os_name,
                local_kernel,
                std::env::consts::ARCH.to_string(),
                None,
            ),
        };

        Ok(ServerInfo {
            name: server_name.to_string(),
            hostname: system.host_name().unwrap_or_else(|| "unknown".to_string()),
            cpu_cores,
            total_memory_gb: round2(system.total_memory() as f64 / BYTES_PER_GB),
            total_disk_gb: round2(total_disk_gb),
            os_name,
            os_version: system.os_version().unwrap_or_default(),
            os_kernel,
            os_arch,
            docker_version,
        })
    }

    async fn sample(&self) -> Result<ServerMetrics, CollectorError> {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks_list();
        system.refresh_networks();

        let total_memory = system.total_memory();
        if total_memory == 0 {
            return Err(CollectorError::Sampling(
                "total memory reported as zero".to_string(),
            ));
        }
        let used_memory = total_memory.saturating_sub(system.available_memory());

        let (disk_used_gb, disk_total_gb, disk_percent) =
            summarize_disks(&Self::disk_usage(&system));

        let (network_rx_bytes, network_tx_bytes) = pick_interface_counters(
            system
                .networks()
                .iter()
                .map(|(_, data)| (data.total_received(), data.total_transmitted())),
        );

        Ok(ServerMetrics {
            timestamp: chrono::Utc::now(),
            cpu_percent: round2(system.global_cpu_info().cpu_usage() as f64),
            memory_percent: round2(used_memory as f64 / total_memory as f64 * 100.0),
            disk_percent: round2(disk_percent),
            memory_used_gb: round2(used_memory as f64 / BYTES_PER_GB),
            memory_total_gb: round2(total_memory as f64 / BYTES_PER_GB),
            disk_used_gb: round2(disk_used_gb),
            disk_total_gb: round2(disk_total_gb),
            network_rx_bytes,
            network_tx_bytes,
        })
    }
}
