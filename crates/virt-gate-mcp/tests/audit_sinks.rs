// crates/virt-gate-mcp/tests/audit_sinks.rs
// ============================================================================
// Module: Audit Sink Tests
// Description: JSON-lines audit output through the gateway.
// Purpose: Validate sequencing and encoding of persisted audit records.
// Dependencies: virt-gate-mcp, virt-gate-core, tempfile
// ============================================================================

//! Audit sink tests.
//!
//! Security posture: every gateway attempt must land in the audit file with
//! consecutive sequence numbers and redacted parameters.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

mod common;

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use virt_gate_config::AuditConfig;
use virt_gate_core::AuditLog;
use virt_gate_core::AuditSink;
use virt_gate_core::ConnectionManager;
use virt_gate_core::ConnectionSettings;
use virt_gate_core::GatewayConfig;
use virt_gate_core::OperationGateway;
use virt_gate_core::OperationRequest;
use virt_gate_mcp::FileAuditSink;
use virt_gate_mcp::build_audit_sink;
use virt_gate_providers::InMemoryHypervisor;

use crate::common::policy;

#[tokio::test]
async fn file_sink_appends_sequenced_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let sink = Arc::new(FileAuditSink::new(&path).unwrap());
    let connection = ConnectionManager::new(Arc::new(InMemoryHypervisor::new()), ConnectionSettings::default());
    let gateway = OperationGateway::new(
        policy(&["domain.list", "domain.info", "domain.create"]),
        connection,
        AuditLog::new(sink),
        GatewayConfig::default(),
    )
    .unwrap();

    gateway.execute(OperationRequest::new("domain.list", "audit-test")).await.unwrap();
    let _ = gateway.execute(OperationRequest::new("domain.start", "audit-test").with_param("name", "db-01")).await;
    gateway
        .execute(
            OperationRequest::new("domain.create", "audit-test")
                .with_param("xml", "<domain type='kvm'><name>new-01</name></domain>"),
        )
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 3);
    let seqs: Vec<_> = lines.iter().map(|line| line["seq"].clone()).collect();
    assert_eq!(seqs, vec![json!(1), json!(2), json!(3)]);
    assert!(lines.iter().all(|line| line["event"] == json!("virt_gate_operation")));
    assert_eq!(lines[0]["outcome"], json!("success"));
    assert_eq!(lines[1]["outcome"], json!("denied"));
    assert_eq!(lines[1]["detail"], json!("permission"));
    assert_eq!(lines[2]["operation"], json!("domain.create"));
    assert_eq!(lines[2]["params"]["xml"], json!("[xml: 47 bytes]"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_sink_writes_off_the_worker_on_multi_thread_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let sink = Arc::new(FileAuditSink::new(&path).unwrap());
    assert!(sink.performs_blocking_io());
    let connection = ConnectionManager::new(Arc::new(InMemoryHypervisor::new()), ConnectionSettings::default());
    let gateway = OperationGateway::new(
        policy(&["domain.list", "domain.info"]),
        connection,
        AuditLog::new(sink),
        GatewayConfig::default(),
    )
    .unwrap();
    let gateway = Arc::new(gateway);

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.execute(OperationRequest::new("domain.list", "audit-test")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let seqs: Vec<u64> = content
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap()["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (1..=12).collect::<Vec<_>>());
}

#[test]
fn file_sink_reopens_in_append_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    std::fs::write(&path, "{\"existing\":true}\n").unwrap();
    let sink = build_audit_sink(&AuditConfig {
        path: Some(path.display().to_string()),
    })
    .unwrap();
    let log = AuditLog::new(sink);
    assert_eq!(log.last_sequence(), 0);
    drop(log);
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("{\"existing\":true}"));
}

#[test]
fn unopenable_audit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("audit.jsonl");
    let result = build_audit_sink(&AuditConfig {
        path: Some(path.display().to_string()),
    });
    assert!(result.is_err());
}
