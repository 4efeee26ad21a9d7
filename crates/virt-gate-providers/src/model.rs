// crates/virt-gate-providers/src/model.rs
// ============================================================================
// Module: Backend Output Model
// Description: Serializable result shapes shared by all backends.
// Purpose: Give callers one output format regardless of the backend binding.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Result types returned by every backend as JSON. Memory figures are in KiB
//! and storage figures in bytes, matching what the hypervisor reports.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use virt_gate_core::BackendError;

// ============================================================================
// SECTION: Domain State
// ============================================================================

/// Lifecycle state of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    /// No state reported.
    Nostate,
    /// Running.
    Running,
    /// Blocked on a resource.
    Blocked,
    /// Paused by the user.
    Paused,
    /// Shutting down.
    Shutdown,
    /// Powered off.
    Shutoff,
    /// Crashed.
    Crashed,
    /// Suspended by guest power management.
    Pmsuspended,
}

impl DomainState {
    /// Parses the state text printed by `virsh dominfo`.
    #[must_use]
    pub fn from_virsh(text: &str) -> Self {
        match text.trim() {
            "running" => Self::Running,
            "idle" | "blocked" => Self::Blocked,
            "paused" => Self::Paused,
            "in shutdown" => Self::Shutdown,
            "shut off" => Self::Shutoff,
            "crashed" => Self::Crashed,
            "pmsuspended" => Self::Pmsuspended,
            _ => Self::Nostate,
        }
    }

    /// Returns the numeric code used in `state.state` statistics.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Nostate => 0,
            Self::Running => 1,
            Self::Blocked => 2,
            Self::Paused => 3,
            Self::Shutdown => 4,
            Self::Shutoff => 5,
            Self::Crashed => 6,
            Self::Pmsuspended => 7,
        }
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Summary of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainInfo {
    /// Domain name.
    pub name: String,
    /// Domain UUID.
    pub uuid: String,
    /// Runtime id; absent while inactive.
    pub id: Option<u32>,
    /// Current state.
    pub state: DomainState,
    /// Maximum memory in KiB.
    pub max_memory_kib: u64,
    /// Current memory in KiB.
    pub memory_kib: u64,
    /// Virtual CPU count.
    pub vcpus: u32,
    /// Consumed CPU time in nanoseconds, when reported.
    pub cpu_time_ns: Option<u64>,
    /// Starts with the host.
    pub autostart: bool,
    /// Has a persistent definition.
    pub persistent: bool,
}

/// Statistics for one domain keyed by `virsh domstats` field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    /// Domain name.
    pub name: String,
    /// Current state.
    pub state: DomainState,
    /// Requested statistic groups.
    pub flags: Vec<String>,
    /// Statistic values.
    pub stats: BTreeMap<String, Value>,
}

/// Host capabilities and capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    /// Host name.
    pub hostname: String,
    /// Connection URI.
    pub uri: String,
    /// CPU model or architecture.
    pub cpu_model: String,
    /// Logical CPU count.
    pub cpus: u32,
    /// CPU frequency in MHz.
    pub cpu_mhz: u32,
    /// Socket count.
    pub cpu_sockets: u32,
    /// Cores per socket.
    pub cores_per_socket: u32,
    /// Threads per core.
    pub threads_per_core: u32,
    /// NUMA node count.
    pub numa_nodes: u32,
    /// Installed memory in KiB.
    pub memory_kib: u64,
}

/// Summary of one virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    /// Network name.
    pub name: String,
    /// Network UUID.
    pub uuid: String,
    /// Network is active.
    pub active: bool,
    /// Bridge device, when the network has one.
    pub bridge: Option<String>,
    /// Starts with the host.
    pub autostart: bool,
    /// Has a persistent definition.
    pub persistent: bool,
}

/// Summary of one storage pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoragePoolInfo {
    /// Pool name.
    pub name: String,
    /// Pool UUID.
    pub uuid: String,
    /// Pool state (`running`, `inactive`, `building`, `degraded`, `inaccessible`).
    pub state: String,
    /// Capacity in bytes.
    pub capacity_bytes: u64,
    /// Allocated bytes.
    pub allocation_bytes: u64,
    /// Available bytes.
    pub available_bytes: u64,
    /// Starts with the host.
    pub autostart: bool,
    /// Has a persistent definition.
    pub persistent: bool,
}

/// Outcome of a state-changing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    /// Always true; failures surface as errors instead.
    pub success: bool,
    /// Affected domain.
    pub domain: String,
    /// Action performed, e.g. `started` or `already_running`.
    pub action: &'static str,
    /// Human-readable summary.
    pub message: String,
}

impl ActionResult {
    /// Builds a successful action result.
    #[must_use]
    pub fn new(domain: impl Into<String>, action: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            domain: domain.into(),
            action,
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Keeps the domains matching a `domain.list` state filter.
///
/// `running` and `active` keep running domains; `stopped` and `inactive`
/// keep powered-off domains; `all` keeps everything.
#[must_use]
pub fn filter_by_state(domains: Vec<DomainInfo>, filter: &str) -> Vec<DomainInfo> {
    let wanted = match filter {
        "running" | "active" => DomainState::Running,
        "stopped" | "inactive" => DomainState::Shutoff,
        _ => return domains,
    };
    domains.into_iter().filter(|domain| domain.state == wanted).collect()
}

/// Serializes a result into the JSON returned to the gateway.
///
/// # Errors
///
/// Returns an operation error when serialization fails.
pub fn to_output<T: Serialize>(value: &T) -> Result<Value, BackendError> {
    serde_json::to_value(value).map_err(|err| BackendError::operation(format!("failed to encode result: {err}")))
}
