// crates/virt-gate-mcp/src/lib.rs
// ============================================================================
// Module: Virt Gate MCP
// Description: MCP server and tool routing for Virt Gate.
// Purpose: Provide MCP tool adapters over the Virt Gate operation gateway.
// Dependencies: virt-gate-core, virt-gate-config, virt-gate-providers, axum, tokio
// ============================================================================

//! ## Overview
//! Virt Gate MCP exposes the operation gateway through MCP tools over stdio,
//! HTTP, and SSE. All operation tools are thin wrappers over
//! [`virt_gate_core::OperationGateway`]; audit records leave the process
//! through the JSON-lines sinks in [`audit`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod server;
pub mod tools;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FileAuditSink;
pub use audit::StderrAuditSink;
pub use audit::build_audit_sink;
pub use server::McpServer;
pub use server::McpServerError;
pub use server::build_connector;
pub use server::build_gateway;
pub use server::reload_policy_from;
pub use tools::GATEWAY_STATUS_TOOL;
pub use tools::TOOL_BINDINGS;
pub use tools::ToolBinding;
pub use tools::ToolDefinition;
pub use tools::ToolError;
pub use tools::ToolRouter;
