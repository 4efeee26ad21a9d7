// crates/virt-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Virt Gate Runtime
// Description: Runtime components of the operation gateway.
// Purpose: Group policy, throttling, connection, audit, and orchestration.
// Dependencies: crate::{core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! Runtime components hold the gateway's shared state: the permission
//! registry, the concurrency limiter, the backend connection manager, and the
//! audit log. [`OperationGateway`] wires them into the per-request pipeline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod connection;
pub mod gateway;
pub mod limiter;
pub mod policy;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditLog;
pub use audit::InMemoryAuditSink;
pub use audit::NoopAuditSink;
pub use connection::ConnectionError;
pub use connection::ConnectionManager;
pub use connection::ConnectionSettings;
pub use connection::ConnectionState;
pub use connection::RetryPolicy;
pub use gateway::GatewayConfig;
pub use gateway::GatewayError;
pub use gateway::GatewayStatus;
pub use gateway::OperationGateway;
pub use limiter::ConcurrencyLimiter;
pub use limiter::Lease;
pub use limiter::LimiterError;
pub use policy::OperationMatcher;
pub use policy::PermissionPolicy;
pub use policy::PermissionRegistry;
pub use policy::PolicyError;
pub use policy::PolicySnapshot;
