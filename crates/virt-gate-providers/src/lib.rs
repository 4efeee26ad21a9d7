// crates/virt-gate-providers/src/lib.rs
// ============================================================================
// Module: Virt Gate Providers
// Description: Built-in backend bindings for the operation gateway.
// Purpose: Connect the gateway to a hypervisor through `virsh` or in memory.
// Dependencies: virt-gate-core, tokio, tempfile, serde
// ============================================================================

//! ## Overview
//! This crate ships two [`virt_gate_core::BackendConnector`] implementations:
//! [`VirshConnector`], which drives the hypervisor through the `virsh`
//! command-line client, and [`InMemoryHypervisor`], a seeded in-process
//! hypervisor with fault injection for demos and tests. Both render results
//! through the shared [`model`] types so callers see one output shape.
//! Invariants:
//! - Parameters arrive validated and defaulted by the gateway.
//! - Failures are classified into connection, not-found, and operation errors.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod memory;
pub mod model;
pub mod params;
pub mod parse;
pub mod virsh;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use memory::InMemoryHypervisor;
pub use model::ActionResult;
pub use model::DomainInfo;
pub use model::DomainState;
pub use model::DomainStats;
pub use model::HostInfo;
pub use model::NetworkInfo;
pub use model::StoragePoolInfo;
pub use virsh::VirshConnector;
