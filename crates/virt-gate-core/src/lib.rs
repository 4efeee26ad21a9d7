// crates/virt-gate-core/src/lib.rs
// ============================================================================
// Module: Virt Gate Core Library
// Description: Public API surface for the Virt Gate operation gateway.
// Purpose: Expose core types, backend interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Virt Gate core sits between a protocol-facing tool layer and a privileged
//! virtualization backend. Every operation request is validated against the
//! operation catalog, authorized against an allow-list snapshot, admitted
//! through a concurrency limiter, executed over a single managed backend
//! connection, and recorded exactly once in an append-only audit trail.
//!
//! The crate is backend-agnostic: concrete hypervisor bindings implement
//! [`BackendConnector`] and [`BackendSession`], and audit destinations
//! implement [`AuditSink`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AuditSink;
pub use interfaces::AuditSinkError;
pub use interfaces::BackendConnector;
pub use interfaces::BackendError;
pub use interfaces::BackendErrorKind;
pub use interfaces::BackendSession;
pub use interfaces::ConnectTarget;
pub use runtime::AuditLog;
pub use runtime::ConcurrencyLimiter;
pub use runtime::ConnectionError;
pub use runtime::ConnectionManager;
pub use runtime::ConnectionSettings;
pub use runtime::ConnectionState;
pub use runtime::GatewayConfig;
pub use runtime::GatewayError;
pub use runtime::GatewayStatus;
pub use runtime::InMemoryAuditSink;
pub use runtime::Lease;
pub use runtime::LimiterError;
pub use runtime::NoopAuditSink;
pub use runtime::OperationGateway;
pub use runtime::OperationMatcher;
pub use runtime::PermissionPolicy;
pub use runtime::PermissionRegistry;
pub use runtime::PolicyError;
pub use runtime::PolicySnapshot;
pub use runtime::RetryPolicy;
