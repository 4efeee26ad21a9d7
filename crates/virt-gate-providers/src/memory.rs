// crates/virt-gate-providers/src/memory.rs
// ============================================================================
// Module: In-Memory Hypervisor
// Description: Seeded in-process hypervisor implementing every operation.
// Purpose: Run the gateway without a hypervisor and inject backend faults.
// Dependencies: async-trait, serde_json, virt-gate-core
// ============================================================================

//! ## Overview
//! [`InMemoryHypervisor`] keeps domains, networks, and storage pools in a
//! mutex-guarded table and follows the lifecycle rules of a real hypervisor
//! closely enough for demos and tests: transient domains disappear when they
//! stop, running domains cannot be deleted without force, and live device
//! changes need a running domain.
//!
//! Fault injection: [`InMemoryHypervisor::fail_next_connects`] makes connect
//! attempts fail, and [`InMemoryHypervisor::break_sessions`] invalidates
//! every open session so its next call fails with a connection-class error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use virt_gate_core::BackendConnector;
use virt_gate_core::BackendError;
use virt_gate_core::BackendSession;
use virt_gate_core::ConnectTarget;
use virt_gate_core::OperationParams;
use virt_gate_core::OperationSpec;

use crate::model::ActionResult;
use crate::model::DomainInfo;
use crate::model::DomainState;
use crate::model::DomainStats;
use crate::model::HostInfo;
use crate::model::NetworkInfo;
use crate::model::StoragePoolInfo;
use crate::model::filter_by_state;
use crate::model::to_output;
use crate::params;
use crate::parse::element_text;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Memory assigned when a domain definition omits `<memory>`.
const DEFAULT_MEMORY_KIB: u64 = 1_048_576;

/// CPU time charged per start for the simulated clock.
const CPU_TIME_PER_START_NS: u64 = 1_500_000_000;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One simulated domain.
#[derive(Debug, Clone)]
struct MemoryDomain {
    /// Domain UUID.
    uuid: String,
    /// Runtime id while running.
    id: Option<u32>,
    /// Current state.
    state: DomainState,
    /// Maximum memory in KiB.
    max_memory_kib: u64,
    /// Current memory in KiB.
    memory_kib: u64,
    /// Virtual CPU count.
    vcpus: u32,
    /// Simulated CPU time.
    cpu_time_ns: u64,
    /// Starts with the host.
    autostart: bool,
    /// Has a persistent definition.
    persistent: bool,
    /// Definition document.
    xml: String,
    /// Attached device documents.
    devices: Vec<String>,
}

/// Mutable hypervisor contents.
#[derive(Debug, Default)]
struct HypervisorState {
    /// Domains by name.
    domains: BTreeMap<String, MemoryDomain>,
    /// Virtual networks.
    networks: Vec<NetworkInfo>,
    /// Storage pools.
    pools: Vec<StoragePoolInfo>,
    /// Next runtime id.
    next_id: u32,
    /// Next UUID suffix.
    next_uuid: u64,
    /// Connect attempts left to fail.
    fail_connects: u32,
    /// Session epoch; sessions from older epochs are broken.
    epoch: u64,
    /// Total connect attempts.
    connects: u64,
    /// Total sessions closed.
    closed: u64,
}

/// In-process hypervisor usable as a backend connector.
#[derive(Debug, Clone)]
pub struct InMemoryHypervisor {
    /// Shared state.
    state: Arc<Mutex<HypervisorState>>,
}

impl Default for InMemoryHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHypervisor {
    /// Creates a hypervisor seeded with two domains, a network, and a pool.
    #[must_use]
    pub fn new() -> Self {
        let hypervisor = Self::empty();
        {
            let mut state = hypervisor.lock();
            state.insert_domain("web-01", 2, 2_097_152, true);
            state.insert_domain("db-01", 4, 4_194_304, false);
            let uuid = state.allocate_uuid();
            state.networks.push(NetworkInfo {
                name: "default".to_string(),
                uuid,
                active: true,
                bridge: Some("virbr0".to_string()),
                autostart: true,
                persistent: true,
            });
            let uuid = state.allocate_uuid();
            state.pools.push(StoragePoolInfo {
                name: "default".to_string(),
                uuid,
                state: "running".to_string(),
                capacity_bytes: 107_374_182_400,
                allocation_bytes: 21_474_836_480,
                available_bytes: 85_899_345_920,
                autostart: true,
                persistent: true,
            });
        }
        hypervisor
    }

    /// Creates a hypervisor with no resources.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: Arc::new(Mutex::new(HypervisorState {
                next_id: 1,
                ..HypervisorState::default()
            })),
        }
    }

    /// Adds a persistent domain.
    pub fn add_domain(&self, name: &str, running: bool) {
        self.lock().insert_domain(name, 1, DEFAULT_MEMORY_KIB, running);
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Invalidates every open session.
    pub fn break_sessions(&self) {
        self.lock().epoch += 1;
    }

    /// Returns the number of connect attempts made.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.lock().connects
    }

    /// Returns the number of sessions closed.
    #[must_use]
    pub fn closed_sessions(&self) -> u64 {
        self.lock().closed
    }

    /// Returns the state of a domain, when it exists.
    #[must_use]
    pub fn domain_state(&self, name: &str) -> Option<DomainState> {
        self.lock().domains.get(name).map(|domain| domain.state)
    }

    /// Returns the device documents attached to a domain.
    #[must_use]
    pub fn devices(&self, name: &str) -> Vec<String> {
        self.lock().domains.get(name).map(|domain| domain.devices.clone()).unwrap_or_default()
    }

    /// Locks the shared state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, HypervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

#[async_trait]
impl BackendConnector for InMemoryHypervisor {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn BackendSession>, BackendError> {
        let mut state = self.lock();
        state.connects += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(BackendError::connection(format!("failed to connect to the hypervisor at {}", target.uri)));
        }
        Ok(Arc::new(MemorySession {
            hypervisor: self.clone(),
            epoch: state.epoch,
            uri: target.uri.clone(),
            readonly: target.readonly,
        }))
    }
}

/// Session bound to one epoch of an [`InMemoryHypervisor`].
#[derive(Debug)]
struct MemorySession {
    /// Owning hypervisor.
    hypervisor: InMemoryHypervisor,
    /// Epoch the session was opened in.
    epoch: u64,
    /// URI reported by `host.info`.
    uri: String,
    /// Refuse state changes.
    readonly: bool,
}

#[async_trait]
impl BackendSession for MemorySession {
    async fn call(&self, operation: &OperationSpec, params: &OperationParams) -> Result<Value, BackendError> {
        let mut state = self.hypervisor.lock();
        if state.epoch != self.epoch {
            return Err(BackendError::connection("End of file while reading data: connection closed"));
        }
        if self.readonly && operation.class.is_mutating() {
            return Err(BackendError::operation(format!(
                "operation forbidden: read only access prevents {}",
                operation.name
            )));
        }
        match operation.name {
            "domain.list" => state.list_domains(params),
            "domain.info" => to_output(&state.domain(params::string(params, "name")?)?.1),
            "domain.start" => state.start(params::string(params, "name")?),
            "domain.stop" => state.stop(params::string(params, "name")?, params::flag(params, "force")),
            "domain.reboot" => state.reboot(params::string(params, "name")?),
            "domain.stats" => state.stats(params::string(params, "name")?, params::strings(params, "flags")),
            "domain.getxml" => {
                let name = params::string(params, "name")?;
                let (domain, _) = state.domain(name)?;
                Ok(json!({ "name": name, "xml": domain.xml }))
            }
            "domain.create" => state.create(params::string(params, "xml")?, params::flag(params, "ephemeral")),
            "domain.delete" => state.delete(
                params::string(params, "name")?,
                params::flag(params, "force"),
                params::flag(params, "remove_storage"),
            ),
            "domain.attach_device" | "domain.detach_device" => {
                state.change_device(operation.name == "domain.attach_device", params)
            }
            "host.info" => to_output(&host_info(&self.uri, &state)),
            "network.list" => to_output(&state.networks),
            "storage.list" => to_output(&state.pools),
            other => Err(BackendError::operation(format!("unsupported operation `{other}`"))),
        }
    }

    async fn close(&self) {
        self.hypervisor.lock().closed += 1;
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

impl HypervisorState {
    /// Returns a fresh UUID.
    fn allocate_uuid(&mut self) -> String {
        self.next_uuid += 1;
        format!("6d1f0c3e-7a41-4c2b-9e55-{:012x}", self.next_uuid)
    }

    /// Returns a fresh runtime id.
    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Inserts a persistent domain with a generated definition.
    fn insert_domain(&mut self, name: &str, vcpus: u32, memory_kib: u64, running: bool) {
        let uuid = self.allocate_uuid();
        let id = running.then(|| self.allocate_id());
        let xml = format!(
            "<domain type='kvm'>\n  <name>{name}</name>\n  <uuid>{uuid}</uuid>\n  <memory \
             unit='KiB'>{memory_kib}</memory>\n  <vcpu>{vcpus}</vcpu>\n</domain>\n"
        );
        self.domains.insert(name.to_string(), MemoryDomain {
            uuid,
            id,
            state: if running { DomainState::Running } else { DomainState::Shutoff },
            max_memory_kib: memory_kib,
            memory_kib,
            vcpus,
            cpu_time_ns: if running { CPU_TIME_PER_START_NS } else { 0 },
            autostart: false,
            persistent: true,
            xml,
            devices: Vec::new(),
        });
    }

    /// Looks up a domain and its summary.
    fn domain(&self, name: &str) -> Result<(&MemoryDomain, DomainInfo), BackendError> {
        let domain = self
            .domains
            .get(name)
            .ok_or_else(|| BackendError::not_found(format!("Domain not found: no domain with matching name '{name}'")))?;
        Ok((domain, summarize(name, domain)))
    }

    /// Looks up a domain for mutation.
    fn domain_mut(&mut self, name: &str) -> Result<&mut MemoryDomain, BackendError> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| BackendError::not_found(format!("Domain not found: no domain with matching name '{name}'")))
    }

    /// Lists domains with the `domain.list` filters applied.
    fn list_domains(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let include_inactive = params::flag_or(params, "include_inactive", true);
        let filter = params::string(params, "state").unwrap_or("all");
        let domains = self
            .domains
            .iter()
            .filter(|(_, domain)| include_inactive || domain.id.is_some())
            .map(|(name, domain)| summarize(name, domain))
            .collect();
        to_output(&filter_by_state(domains, filter))
    }

    /// Starts a domain.
    fn start(&mut self, name: &str) -> Result<Value, BackendError> {
        if self.domain_mut(name)?.state == DomainState::Running {
            return to_output(&ActionResult::new(name, "already_running", format!("domain {name} is already running")));
        }
        let id = self.allocate_id();
        let domain = self.domain_mut(name)?;
        domain.state = DomainState::Running;
        domain.id = Some(id);
        domain.cpu_time_ns = domain.cpu_time_ns.saturating_add(CPU_TIME_PER_START_NS);
        to_output(&ActionResult::new(name, "started", format!("domain {name} started")))
    }

    /// Stops a domain; transient domains are removed.
    fn stop(&mut self, name: &str, force: bool) -> Result<Value, BackendError> {
        let domain = self.domain_mut(name)?;
        if domain.state == DomainState::Shutoff {
            return to_output(&ActionResult::new(name, "already_stopped", format!("domain {name} is already stopped")));
        }
        domain.state = DomainState::Shutoff;
        domain.id = None;
        if !domain.persistent {
            self.domains.remove(name);
        }
        let result = if force {
            ActionResult::new(name, "destroyed", format!("domain {name} powered off"))
        } else {
            ActionResult::new(name, "shutdown_requested", format!("domain {name} is shutting down"))
        };
        to_output(&result)
    }

    /// Reboots a running domain.
    fn reboot(&mut self, name: &str) -> Result<Value, BackendError> {
        let domain = self.domain_mut(name)?;
        if domain.state != DomainState::Running {
            return Err(BackendError::operation(format!(
                "Requested operation is not valid: domain {name} is not running"
            )));
        }
        domain.cpu_time_ns = domain.cpu_time_ns.saturating_add(CPU_TIME_PER_START_NS);
        to_output(&ActionResult::new(name, "reboot_requested", format!("domain {name} is rebooting")))
    }

    /// Reports simulated statistics for the requested groups.
    fn stats(&self, name: &str, flags: Vec<String>) -> Result<Value, BackendError> {
        let (domain, info) = self.domain(name)?;
        let mut stats = BTreeMap::new();
        for flag in &flags {
            match flag.as_str() {
                "state" => {
                    stats.insert("state.state".to_string(), json!(domain.state.code()));
                    stats.insert("state.reason".to_string(), json!(1));
                }
                "cpu-total" => {
                    stats.insert("cpu.time".to_string(), json!(domain.cpu_time_ns));
                }
                "balloon" => {
                    stats.insert("balloon.current".to_string(), json!(domain.memory_kib));
                    stats.insert("balloon.maximum".to_string(), json!(domain.max_memory_kib));
                }
                "vcpu" => {
                    stats.insert("vcpu.current".to_string(), json!(domain.vcpus));
                    stats.insert("vcpu.maximum".to_string(), json!(domain.vcpus));
                }
                "interface" => {
                    stats.insert("net.count".to_string(), json!(count_devices(domain, "<interface")));
                }
                "block" => {
                    stats.insert("block.count".to_string(), json!(count_devices(domain, "<disk")));
                }
                _ => {}
            }
        }
        to_output(&DomainStats {
            name: name.to_string(),
            state: info.state,
            flags,
            stats,
        })
    }

    /// Defines or creates a domain from XML.
    fn create(&mut self, xml: &str, ephemeral: bool) -> Result<Value, BackendError> {
        let name = element_text(xml, "name")
            .ok_or_else(|| BackendError::operation("XML error: domain definition has no <name>"))?;
        if self.domains.contains_key(&name) {
            return Err(BackendError::operation(format!("operation failed: domain '{name}' already exists")));
        }
        let memory_kib =
            element_text(xml, "memory").and_then(|value| value.parse().ok()).unwrap_or(DEFAULT_MEMORY_KIB);
        let vcpus = element_text(xml, "vcpu").and_then(|value| value.parse().ok()).unwrap_or(1);
        let uuid = element_text(xml, "uuid").unwrap_or_else(|| self.allocate_uuid());
        let id = ephemeral.then(|| self.allocate_id());
        self.domains.insert(name.clone(), MemoryDomain {
            uuid,
            id,
            state: if ephemeral { DomainState::Running } else { DomainState::Shutoff },
            max_memory_kib: memory_kib,
            memory_kib,
            vcpus,
            cpu_time_ns: 0,
            autostart: false,
            persistent: !ephemeral,
            xml: xml.to_string(),
            devices: Vec::new(),
        });
        let result = if ephemeral {
            ActionResult::new(name.clone(), "created", format!("transient domain {name} created"))
        } else {
            ActionResult::new(name.clone(), "defined", format!("domain {name} defined"))
        };
        to_output(&result)
    }

    /// Deletes a domain.
    fn delete(&mut self, name: &str, force: bool, remove_storage: bool) -> Result<Value, BackendError> {
        if self.domain_mut(name)?.state == DomainState::Running && !force {
            return Err(BackendError::operation(format!(
                "domain {name} is running; set force to stop it before deleting"
            )));
        }
        self.domains.remove(name);
        let message = if remove_storage {
            format!("domain {name} and its storage deleted")
        } else {
            format!("domain {name} deleted")
        };
        to_output(&ActionResult::new(name, "deleted", message))
    }

    /// Attaches or detaches a device document.
    fn change_device(&mut self, attach: bool, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "domain_name")?;
        let device_xml = params::string(params, "device_xml")?.trim().to_string();
        let live = params::flag_or(params, "live", true);
        let domain = self.domain_mut(name)?;
        if live && domain.state != DomainState::Running {
            return Err(BackendError::operation(format!(
                "Requested operation is not valid: domain {name} is not running"
            )));
        }
        let action = if attach {
            domain.devices.push(device_xml);
            "device_attached"
        } else {
            let position = domain.devices.iter().position(|device| *device == device_xml).ok_or_else(|| {
                BackendError::operation("operation failed: matching device was not found")
            })?;
            domain.devices.remove(position);
            "device_detached"
        };
        to_output(&ActionResult::new(name, action, format!("{action} on domain {name}")))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the public summary of a domain.
fn summarize(name: &str, domain: &MemoryDomain) -> DomainInfo {
    DomainInfo {
        name: name.to_string(),
        uuid: domain.uuid.clone(),
        id: domain.id,
        state: domain.state,
        max_memory_kib: domain.max_memory_kib,
        memory_kib: domain.memory_kib,
        vcpus: domain.vcpus,
        cpu_time_ns: Some(domain.cpu_time_ns),
        autostart: domain.autostart,
        persistent: domain.persistent,
    }
}

/// Counts attached devices whose document starts with `prefix`.
fn count_devices(domain: &MemoryDomain, prefix: &str) -> usize {
    domain.devices.iter().filter(|device| device.starts_with(prefix)).count()
}

/// Reports fixed host capacity.
fn host_info(uri: &str, state: &HypervisorState) -> HostInfo {
    let running_vcpus: u32 = state
        .domains
        .values()
        .filter(|domain| domain.state == DomainState::Running)
        .map(|domain| domain.vcpus)
        .sum();
    HostInfo {
        hostname: "memory-hypervisor".to_string(),
        uri: uri.to_string(),
        cpu_model: "x86_64".to_string(),
        cpus: 16.max(running_vcpus),
        cpu_mhz: 2400,
        cpu_sockets: 1,
        cores_per_socket: 8,
        threads_per_core: 2,
        numa_nodes: 1,
        memory_kib: 67_108_864,
    }
}
