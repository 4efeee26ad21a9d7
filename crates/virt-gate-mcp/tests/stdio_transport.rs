// crates/virt-gate-mcp/tests/stdio_transport.rs
// ============================================================================
// Module: Stdio Transport Tests
// Description: Framed JSON-RPC sessions over in-memory duplex streams.
// Purpose: Validate concurrent dispatch, cancellation, and EOF handling.
// Dependencies: virt-gate-mcp, tokio
// ============================================================================

//! Stdio transport tests.
//!
//! Security posture: these tests assert that abandoned calls are cancelled
//! and audited rather than left running against the backend.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::DuplexStream;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::task::JoinHandle;
use virt_gate_core::AuditOutcome;
use virt_gate_core::OutcomeDetail;
use virt_gate_mcp::McpServerError;

use crate::common::Harness;
use crate::common::StallingConnector;
use crate::common::harness_with;
use crate::common::memory_harness;
use crate::common::read_frame;
use crate::common::read_line;
use crate::common::wait_for_in_flight;
use crate::common::write_frame;
use crate::common::write_line;

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<Result<(), McpServerError>>,
}

fn spawn(harness: Harness) -> Client {
    let (client, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let server = harness.server;
    let task = tokio::spawn(async move { server.serve_stdio(server_read, server_write).await });
    let (reader, writer) = tokio::io::split(client);
    Client {
        reader: BufReader::new(reader),
        writer,
        server: task,
    }
}

fn call(id: u64, tool: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": tool, "arguments": arguments },
    })
}

#[tokio::test]
async fn session_handles_pipelined_requests() {
    let mut client = spawn(memory_harness(&["domain.*", "host.info"]));
    write_frame(&mut client.writer, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    write_frame(&mut client.writer, &json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    write_frame(&mut client.writer, &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    write_frame(&mut client.writer, &call(3, "list_domains", json!({}))).await;
    write_frame(&mut client.writer, &call(4, "host_info", json!({}))).await;

    let mut responses = BTreeMap::new();
    for _ in 0 .. 4 {
        let response = read_frame(&mut client.reader).await;
        responses.insert(response["id"].as_u64().unwrap(), response);
    }
    assert_eq!(responses[&1]["result"]["protocolVersion"], json!("2024-11-05"));
    assert_eq!(responses[&2]["result"]["tools"].as_array().map(Vec::len), Some(15));
    assert_eq!(responses[&3]["result"]["structuredContent"].as_array().map(Vec::len), Some(2));
    assert!(responses[&4]["result"]["structuredContent"]["cpus"].as_u64().is_some());

    client.writer.shutdown().await.unwrap();
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn newline_delimited_session_gets_newline_delimited_replies() {
    let mut client = spawn(memory_harness(&["domain.list", "domain.info"]));
    write_line(&mut client.writer, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    let init = read_line(&mut client.reader).await;
    assert_eq!(init["id"], json!(1));
    assert_eq!(init["result"]["protocolVersion"], json!("2024-11-05"));

    write_line(&mut client.writer, &json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    write_line(&mut client.writer, &call(2, "list_domains", json!({}))).await;
    let listed = read_line(&mut client.reader).await;
    assert_eq!(listed["id"], json!(2));
    assert_eq!(listed["result"]["structuredContent"].as_array().map(Vec::len), Some(2));

    client.writer.write_all(b"{nope\n").await.unwrap();
    let error = read_line(&mut client.reader).await;
    assert_eq!(error["error"]["code"], json!(-32700));

    write_frame(&mut client.writer, &json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})).await;
    let pong = read_frame(&mut client.reader).await;
    assert_eq!(pong["result"], json!({}));

    client.writer.shutdown().await.unwrap();
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn denied_and_invalid_calls_report_kinds() {
    let mut client = spawn(memory_harness(&["domain.list", "domain.info"]));
    write_frame(&mut client.writer, &call(1, "start_domain", json!({"name": "db-01"}))).await;
    let denied = read_frame(&mut client.reader).await;
    assert_eq!(denied["error"]["code"], json!(-32001));
    assert_eq!(denied["error"]["data"]["kind"], json!("permission_denied"));

    write_frame(&mut client.writer, &call(2, "domain_info", json!({"name": "../etc/passwd"}))).await;
    let invalid = read_frame(&mut client.reader).await;
    assert_eq!(invalid["error"]["code"], json!(-32602));
    assert_eq!(invalid["error"]["data"]["kind"], json!("validation_error"));

    write_frame(&mut client.writer, &call(3, "domain_info", json!({"name": "ghost"}))).await;
    let missing = read_frame(&mut client.reader).await;
    assert_eq!(missing["error"]["code"], json!(-32011));
    assert_eq!(missing["error"]["data"]["kind"], json!("backend_operation_error"));

    client.writer.shutdown().await.unwrap();
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_json_gets_parse_error_and_session_continues() {
    let mut client = spawn(memory_harness(&["domain.list", "domain.info"]));
    let garbage = b"{nope";
    client.writer.write_all(format!("Content-Length: {}\r\n\r\n", garbage.len()).as_bytes()).await.unwrap();
    client.writer.write_all(garbage).await.unwrap();
    let error = read_frame(&mut client.reader).await;
    assert_eq!(error["error"]["code"], json!(-32700));
    assert_eq!(error["id"], Value::Null);

    write_frame(&mut client.writer, &json!({"jsonrpc": "2.0", "id": 5, "method": "ping"})).await;
    let pong = read_frame(&mut client.reader).await;
    assert_eq!(pong["result"], json!({}));

    client.writer.shutdown().await.unwrap();
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancelled_notification_cancels_matching_call() {
    let harness = harness_with(Arc::new(StallingConnector), &["domain.list", "domain.info"]);
    let gateway = Arc::clone(&harness.gateway);
    let audit = Arc::clone(&harness.audit);
    let mut client = spawn(harness);

    write_frame(&mut client.writer, &call(9, "list_domains", json!({}))).await;
    wait_for_in_flight(&gateway, 1).await;
    write_frame(
        &mut client.writer,
        &json!({"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 9}}),
    )
    .await;

    let response = read_frame(&mut client.reader).await;
    assert_eq!(response["id"], json!(9));
    assert_eq!(response["error"]["code"], json!(-32800));
    assert_eq!(response["error"]["data"]["kind"], json!("cancelled"));
    assert_eq!(gateway.status().in_flight, 0);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload.outcome, AuditOutcome::Error);
    assert_eq!(records[0].payload.detail, OutcomeDetail::Cancelled);
    assert_eq!(records[0].payload.caller.as_str(), "stdio:9");

    client.writer.shutdown().await.unwrap();
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn eof_cancels_in_flight_calls_before_exit() {
    let harness = harness_with(Arc::new(StallingConnector), &["domain.list", "domain.info"]);
    let gateway = Arc::clone(&harness.gateway);
    let audit = Arc::clone(&harness.audit);
    let mut client = spawn(harness);

    write_frame(&mut client.writer, &call(1, "list_domains", json!({}))).await;
    write_frame(&mut client.writer, &call(2, "domain_info", json!({"name": "web-01"}))).await;
    wait_for_in_flight(&gateway, 2).await;
    client.writer.shutdown().await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0 .. 2 {
        let response = read_frame(&mut client.reader).await;
        kinds.push(response["error"]["data"]["kind"].clone());
    }
    assert_eq!(kinds, vec![json!("cancelled"), json!("cancelled")]);
    client.server.await.unwrap().unwrap();
    assert_eq!(gateway.status().in_flight, 0);
    assert_eq!(audit.records().len(), 2);
}
