// crates/virt-gate-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Gateway builders and stdio frame helpers for MCP tests.
// Purpose: Drive the server over in-memory streams and sockets.
// Dependencies: virt-gate-mcp, virt-gate-core, virt-gate-providers, tokio
// ============================================================================

//! ## Overview
//! Builds servers over the in-memory hypervisor or a backend whose calls
//! never complete, and speaks Content-Length framed JSON-RPC as a client.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only fixtures use unwrap for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use virt_gate_config::VirtGateConfig;
use virt_gate_core::AuditLog;
use virt_gate_core::BackendConnector;
use virt_gate_core::BackendError;
use virt_gate_core::BackendSession;
use virt_gate_core::ConnectTarget;
use virt_gate_core::ConnectionManager;
use virt_gate_core::ConnectionSettings;
use virt_gate_core::GatewayConfig;
use virt_gate_core::InMemoryAuditSink;
use virt_gate_core::OperationGateway;
use virt_gate_core::OperationParams;
use virt_gate_core::OperationSpec;
use virt_gate_core::PermissionPolicy;
use virt_gate_mcp::McpServer;
use virt_gate_providers::InMemoryHypervisor;

// ============================================================================
// SECTION: Backends
// ============================================================================

/// Connector whose sessions accept calls that never complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct StallingConnector;

#[async_trait]
impl BackendConnector for StallingConnector {
    async fn connect(&self, _target: &ConnectTarget) -> Result<Arc<dyn BackendSession>, BackendError> {
        Ok(Arc::new(StallingSession))
    }
}

/// Session whose calls wait forever.
struct StallingSession;

#[async_trait]
impl BackendSession for StallingSession {
    async fn call(&self, _operation: &OperationSpec, _params: &OperationParams) -> Result<Value, BackendError> {
        std::future::pending().await
    }

    async fn close(&self) {}
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Server plus handles to inspect its effects.
pub struct Harness {
    pub server: McpServer,
    pub gateway: Arc<OperationGateway>,
    pub audit: Arc<InMemoryAuditSink>,
}

pub fn policy(allowed: &[&str]) -> PermissionPolicy {
    PermissionPolicy {
        allowed_operations: allowed.iter().map(ToString::to_string).collect(),
        ..PermissionPolicy::default()
    }
}

pub fn harness_with(connector: Arc<dyn BackendConnector>, allowed: &[&str]) -> Harness {
    let audit = Arc::new(InMemoryAuditSink::new());
    let connection = ConnectionManager::new(connector, ConnectionSettings::default());
    let gateway = Arc::new(
        OperationGateway::new(policy(allowed), connection, AuditLog::new(audit.clone()), GatewayConfig::default())
            .unwrap(),
    );
    Harness {
        server: McpServer::with_gateway(VirtGateConfig::default(), Arc::clone(&gateway)),
        gateway,
        audit,
    }
}

pub fn memory_harness(allowed: &[&str]) -> Harness {
    harness_with(Arc::new(InMemoryHypervisor::new()), allowed)
}

/// Polls until the gateway reports `count` in-flight operations.
pub async fn wait_for_in_flight(gateway: &OperationGateway, count: usize) {
    for _ in 0 .. 200 {
        if gateway.status().in_flight == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("gateway never reached {count} in-flight operations");
}

// ============================================================================
// SECTION: Framing
// ============================================================================

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
    let payload = serde_json::to_vec(message).unwrap();
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await.unwrap();
    writer.write_all(&payload).await.unwrap();
    writer.flush().await.unwrap();
}

pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
    let mut payload = serde_json::to_vec(message).unwrap();
    payload.push(b'\n');
    writer.write_all(&payload).await.unwrap();
    writer.flush().await.unwrap();
}

pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Value {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await.unwrap();
    assert!(read > 0, "server closed the stream");
    assert!(line.ends_with('\n'), "response is not newline terminated: {line}");
    serde_json::from_str(line.trim_end()).unwrap()
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Value {
    let mut length = None;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.unwrap();
        assert!(read > 0, "server closed the stream");
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            length = Some(value.trim().parse::<usize>().unwrap());
        }
    }
    let mut payload = vec![0u8; length.unwrap()];
    reader.read_exact(&mut payload).await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}
