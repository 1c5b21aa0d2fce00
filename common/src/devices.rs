use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The heavy accelerator consumers competing for devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Embed,
    Rerank,
    Enrich,
}

/// Static device assignment.
///
/// With three or more devices each consumer gets dedicated hardware: device
/// 0 embeds, device 1 reranks, the rest serve the LLM worker pool. Below
/// three the plan collapses and consumers share devices behind a mutex; the
/// caller must unload and flush when the task on a shared device changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlan {
    pub gpu_count: u32,
    pub embed_device: u32,
    pub rerank_device: u32,
    pub llm_devices: Vec<u32>,
    pub collapsed: bool,
}

impl DevicePlan {
    pub fn new(gpu_count: u32) -> Self {
        match gpu_count {
            0 | 1 => Self {
                gpu_count,
                embed_device: 0,
                rerank_device: 0,
                llm_devices: vec![0],
                collapsed: true,
            },
            2 => Self {
                gpu_count,
                embed_device: 0,
                rerank_device: 1,
                llm_devices: vec![0, 1],
                collapsed: true,
            },
            n => Self {
                gpu_count: n,
                embed_device: 0,
                rerank_device: 1,
                llm_devices: (2..n).collect(),
                collapsed: false,
            },
        }
    }

    /// Size of the LLM enrichment worker pool (`W`).
    pub fn llm_worker_count(&self) -> usize {
        self.llm_devices.len()
    }

    pub fn device_for(&self, task: TaskKind, worker_index: usize) -> u32 {
        match task {
            TaskKind::Embed => self.embed_device,
            TaskKind::Rerank => self.rerank_device,
            TaskKind::Enrich => self.llm_devices[worker_index % self.llm_devices.len()],
        }
    }

    /// The device-visibility value exported to a pinned subprocess, e.g. as
    /// `CUDA_VISIBLE_DEVICES`.
    pub fn visible_devices_env(&self, task: TaskKind, worker_index: usize) -> String {
        self.device_for(task, worker_index).to_string()
    }

    pub fn tasks_on(&self, device: u32) -> Vec<TaskKind> {
        let mut tasks = Vec::new();
        if self.embed_device == device {
            tasks.push(TaskKind::Embed);
        }
        if self.rerank_device == device {
            tasks.push(TaskKind::Rerank);
        }
        if self.llm_devices.contains(&device) {
            tasks.push(TaskKind::Enrich);
        }
        tasks
    }
}

/// Read-only device telemetry; values are opaque to the orchestrator.
pub trait DeviceTelemetry: Send + Sync {
    fn read(&self, device: u32) -> serde_json::Value;
}

/// Default telemetry source when no collector is wired in.
pub struct NullTelemetry;

impl DeviceTelemetry for NullTelemetry {
    fn read(&self, _device: u32) -> serde_json::Value {
        serde_json::json!({
            "utilization": null,
            "memory_free": null,
            "temperature": null,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub device: u32,
    pub assigned: Vec<TaskKind>,
    pub telemetry: serde_json::Value,
}

struct DeviceState {
    last_task: Option<TaskKind>,
}

/// Enforces "at most one heavy task per device".
///
/// On a full plan each task owns its device, so leases never contend; on a
/// collapsed plan the shared mutex serializes consumers, and
/// `task_switched` on the lease tells the caller an `unload()` plus cache
/// flush is due before it proceeds.
pub struct DeviceRegistry {
    plan: DevicePlan,
    devices: HashMap<u32, Arc<Mutex<DeviceState>>>,
    telemetry: Arc<dyn DeviceTelemetry>,
}

pub struct DeviceLease {
    pub device: u32,
    pub task_switched: bool,
    _guard: OwnedMutexGuard<DeviceState>,
}

impl DeviceRegistry {
    pub fn new(plan: DevicePlan, telemetry: Arc<dyn DeviceTelemetry>) -> Self {
        let mut devices = HashMap::new();
        let count = plan.gpu_count.max(1);
        for device in 0..count {
            devices.insert(
                device,
                Arc::new(Mutex::new(DeviceState { last_task: None })),
            );
        }
        Self {
            plan,
            devices,
            telemetry,
        }
    }

    pub fn plan(&self) -> &DevicePlan {
        &self.plan
    }

    pub async fn acquire(&self, task: TaskKind, worker_index: usize) -> DeviceLease {
        let device = self.plan.device_for(task, worker_index);
        let state = self
            .devices
            .get(&device)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(DeviceState { last_task: None })));

        let mut guard = state.lock_owned().await;
        let task_switched = guard.last_task.is_some_and(|previous| previous != task);
        guard.last_task = Some(task);

        DeviceLease {
            device,
            task_switched,
            _guard: guard,
        }
    }

    /// Per-device state for operators; telemetry values pass through opaque.
    pub fn report(&self) -> Vec<DeviceReport> {
        let mut devices: Vec<u32> = self.devices.keys().copied().collect();
        devices.sort_unstable();
        devices
            .into_iter()
            .map(|device| DeviceReport {
                device,
                assigned: self.plan.tasks_on(device),
                telemetry: self.telemetry.read(device),
            })
            .collect()
    }
}
