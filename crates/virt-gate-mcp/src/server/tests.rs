// crates/virt-gate-mcp/src/server/tests.rs
// ============================================================================
// Module: MCP Server Unit Tests
// Description: Unit tests for server framing, dispatch, and error mapping.
// Purpose: Validate server module behavior with in-memory fixtures.
// Dependencies: virt-gate-mcp, virt-gate-core, virt-gate-providers
// ============================================================================

//! ## Overview
//! Exercises stdio framing limits, JSON-RPC decoding, and the mapping of
//! gateway failures onto JSON-RPC error codes.
//!
//! Security posture: tests exercise untrusted request handling.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only framing assertions."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use virt_gate_config::VirtGateConfig;
use virt_gate_core::AuditLog;
use virt_gate_core::BackendErrorKind;
use virt_gate_core::ConnectionManager;
use virt_gate_core::ConnectionSettings;
use virt_gate_core::GatewayConfig;
use virt_gate_core::GatewayError;
use virt_gate_core::InMemoryAuditSink;
use virt_gate_core::OperationGateway;
use virt_gate_core::PermissionPolicy;
use virt_gate_providers::InMemoryHypervisor;

use super::Frame;
use super::Framing;
use super::McpServer;
use super::ServerState;
use super::decode_request;
use super::encode_response;
use super::jsonrpc_error;
use super::parse_request;
use super::read_framed;
use super::write_framed;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut bytes = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    bytes.extend_from_slice(payload);
    bytes
}

fn memory_server() -> McpServer {
    let policy = PermissionPolicy {
        allowed_operations: vec!["domain.list".to_string(), "domain.info".to_string()],
        ..PermissionPolicy::default()
    };
    let connection = ConnectionManager::new(Arc::new(InMemoryHypervisor::new()), ConnectionSettings::default());
    let audit = AuditLog::new(Arc::new(InMemoryAuditSink::new()));
    let gateway = OperationGateway::new(policy, connection, audit, GatewayConfig::default()).unwrap();
    McpServer::with_gateway(VirtGateConfig::default(), Arc::new(gateway))
}

fn state(server: &McpServer, max_body_bytes: usize) -> ServerState {
    ServerState {
        handler: server.handler.clone(),
        max_body_bytes,
        root: CancellationToken::new(),
    }
}

fn to_json(response: &super::JsonRpcResponse) -> Value {
    serde_json::from_slice(&encode_response(response)).unwrap()
}

// ============================================================================
// SECTION: Framing
// ============================================================================

#[tokio::test]
async fn read_framed_accepts_payload_at_limit() {
    let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
    let bytes = framed(payload);
    let mut reader = bytes.as_slice();
    let frame = read_framed(&mut reader, payload.len()).await.unwrap();
    assert_eq!(frame, Frame::Payload(Framing::ContentLength, payload.to_vec()));
    assert_eq!(read_framed(&mut reader, payload.len()).await.unwrap(), Frame::Closed);
}

#[tokio::test]
async fn read_framed_skips_payload_over_limit() {
    let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
    let mut bytes = framed(payload);
    bytes.extend_from_slice(&framed(b"{}"));
    let mut reader = bytes.as_slice();
    let frame = read_framed(&mut reader, payload.len() - 1).await.unwrap();
    assert_eq!(frame, Frame::Oversized(Framing::ContentLength, payload.len()));
    let next = read_framed(&mut reader, payload.len() - 1).await.unwrap();
    assert_eq!(next, Frame::Payload(Framing::ContentLength, b"{}".to_vec()));
}

#[tokio::test]
async fn read_framed_header_name_is_case_insensitive() {
    let bytes = b"content-length: 2\r\nContent-Type: application/json\r\n\r\n{}".to_vec();
    let mut reader = bytes.as_slice();
    assert_eq!(read_framed(&mut reader, 64).await.unwrap(), Frame::Payload(Framing::ContentLength, b"{}".to_vec()));
}

#[tokio::test]
async fn read_framed_rejects_malformed_headers() {
    let cases: [&[u8]; 4] = [
        b"Content-Length: 2\r\nContent-Length: 2\r\n\r\n{}",
        b"Content-Length: two\r\n\r\n{}",
        b"Content-Type: application/json\r\n\r\n{}",
        b"Content-Length: 2\r\n",
    ];
    for case in cases {
        let mut reader = case;
        assert!(read_framed(&mut reader, 64).await.is_err(), "{}", String::from_utf8_lossy(case));
    }
}

#[tokio::test]
async fn read_framed_rejects_oversized_headers() {
    let mut bytes = format!("X-Padding: {}\r\n", "a".repeat(super::MAX_HEADER_BYTES)).into_bytes();
    bytes.extend_from_slice(b"Content-Length: 2\r\n\r\n{}");
    let mut reader = bytes.as_slice();
    assert!(read_framed(&mut reader, 64).await.is_err());
}

#[tokio::test]
async fn read_framed_rejects_truncated_body() {
    let bytes = b"Content-Length: 10\r\n\r\n{}".to_vec();
    let mut reader = bytes.as_slice();
    assert!(read_framed(&mut reader, 64).await.is_err());
}

#[tokio::test]
async fn read_framed_accepts_newline_delimited_messages() {
    let bytes = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\r\n[1]\r\n{}".to_vec();
    let mut reader = bytes.as_slice();
    assert_eq!(
        read_framed(&mut reader, 64).await.unwrap(),
        Frame::Payload(Framing::NewlineDelimited, br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_vec())
    );
    assert_eq!(read_framed(&mut reader, 64).await.unwrap(), Frame::Payload(Framing::NewlineDelimited, b"[1]".to_vec()));
    assert_eq!(read_framed(&mut reader, 64).await.unwrap(), Frame::Payload(Framing::NewlineDelimited, b"{}".to_vec()));
    assert_eq!(read_framed(&mut reader, 64).await.unwrap(), Frame::Closed);
}

#[tokio::test]
async fn read_framed_mixes_framings_on_one_stream() {
    let mut bytes = b"{\"id\":1}\n".to_vec();
    bytes.extend_from_slice(&framed(b"{\"id\":2}"));
    bytes.extend_from_slice(b"\r\n{\"id\":3}\n");
    let mut reader = bytes.as_slice();
    let framings: Vec<Framing> = [
        read_framed(&mut reader, 64).await.unwrap(),
        read_framed(&mut reader, 64).await.unwrap(),
        read_framed(&mut reader, 64).await.unwrap(),
    ]
    .into_iter()
    .map(|frame| match frame {
        Frame::Payload(framing, _) => framing,
        Frame::Oversized(..) | Frame::Closed => panic!("expected a payload frame"),
    })
    .collect();
    assert_eq!(framings, vec![Framing::NewlineDelimited, Framing::ContentLength, Framing::NewlineDelimited]);
}

#[tokio::test]
async fn read_framed_skips_newline_delimited_line_over_limit() {
    let long = format!("{{\"padding\":\"{}\"}}\n", "a".repeat(super::MAX_HEADER_BYTES * 2));
    let mut bytes = long.clone().into_bytes();
    bytes.extend_from_slice(b"{}\n");
    let mut reader = bytes.as_slice();
    assert_eq!(
        read_framed(&mut reader, 64).await.unwrap(),
        Frame::Oversized(Framing::NewlineDelimited, long.len())
    );
    assert_eq!(read_framed(&mut reader, 64).await.unwrap(), Frame::Payload(Framing::NewlineDelimited, b"{}".to_vec()));

    let mut reader = &b"{\"method\":\"tools/list\"}\n"[..];
    assert_eq!(read_framed(&mut reader, 8).await.unwrap(), Frame::Oversized(Framing::NewlineDelimited, 23));
}

#[tokio::test]
async fn write_framed_answers_in_the_request_framing() {
    let mut out = Vec::new();
    write_framed(&mut out, Framing::NewlineDelimited, b"{}").await.unwrap();
    write_framed(&mut out, Framing::ContentLength, b"{}").await.unwrap();
    assert_eq!(out, b"{}\nContent-Length: 2\r\n\r\n{}".to_vec());
}

// ============================================================================
// SECTION: Decoding and Error Mapping
// ============================================================================

#[test]
fn decode_request_distinguishes_parse_and_shape_errors() {
    let (status, response) = decode_request(b"{not json").unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(to_json(&response)["error"]["code"], json!(-32700));

    let (_, response) = decode_request(br#"{"jsonrpc":"2.0","id":7}"#).unwrap_err();
    let value = to_json(&response);
    assert_eq!(value["error"]["code"], json!(-32600));
    assert_eq!(value["id"], json!(7));
}

#[test]
fn notifications_have_no_id() {
    let request = decode_request(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
    assert!(request.id.is_none());
}

#[test]
fn gateway_errors_carry_kind_in_data() {
    let cases = [
        (GatewayError::Validation("bad".to_string()), -32602, StatusCode::BAD_REQUEST),
        (
            GatewayError::PermissionDenied {
                operation: "domain.delete".to_string(),
            },
            -32001,
            StatusCode::FORBIDDEN,
        ),
        (
            GatewayError::LimitExceeded {
                limit: 1,
            },
            -32002,
            StatusCode::OK,
        ),
        (
            GatewayError::Timeout {
                waited_ms: 5,
            },
            -32003,
            StatusCode::OK,
        ),
        (
            GatewayError::ReadOnly {
                operation: "domain.start".to_string(),
            },
            -32004,
            StatusCode::FORBIDDEN,
        ),
        (GatewayError::BackendUnavailable("down".to_string()), -32010, StatusCode::OK),
        (
            GatewayError::Backend {
                kind: BackendErrorKind::NotFound,
                message: "domain not found".to_string(),
            },
            -32011,
            StatusCode::OK,
        ),
        (GatewayError::Cancelled, -32800, StatusCode::OK),
    ];
    for (err, code, status) in cases {
        let kind = err.kind();
        let retryable = err.is_retryable();
        let (actual_status, response) = jsonrpc_error(json!(1), &ToolError::Gateway(err));
        let value = to_json(&response);
        assert_eq!(actual_status, status, "{kind}");
        assert_eq!(value["error"]["code"], json!(code), "{kind}");
        assert_eq!(value["error"]["data"]["kind"], json!(kind));
        assert_eq!(value["error"]["data"]["retryable"], json!(retryable));
    }
}

// ============================================================================
// SECTION: HTTP Dispatch
// ============================================================================

#[tokio::test]
async fn parse_request_rejects_body_over_limit() {
    let server = memory_server();
    let state = state(&server, 8);
    let body = Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
    let (status, response) = parse_request(&state, "http:test", &body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(to_json(&response.unwrap())["error"]["code"], json!(-32070));
}

#[tokio::test]
async fn parse_request_accepts_notifications_without_body() {
    let server = memory_server();
    let state = state(&server, 1024);
    let body = Bytes::from_static(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    let (status, response) = parse_request(&state, "http:test", &body).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(response.is_none());
}

#[tokio::test]
async fn initialize_reports_server_name_and_protocol() {
    let server = memory_server();
    let state = state(&server, 4096);
    let body = Bytes::from_static(
        br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
    );
    let (status, response) = parse_request(&state, "http:test", &body).await;
    let value = to_json(&response.unwrap());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["result"]["serverInfo"]["name"], json!("libvirt-manager"));
    assert_eq!(value["result"]["protocolVersion"], json!("2025-03-26"));
    assert_eq!(value["result"]["capabilities"]["tools"]["listChanged"], json!(false));
}

#[tokio::test]
async fn wrong_version_and_unknown_method_are_rejected() {
    let server = memory_server();
    let state = state(&server, 4096);
    let body = Bytes::from_static(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#);
    let (status, response) = parse_request(&state, "http:test", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(to_json(&response.unwrap())["error"]["code"], json!(-32600));

    let body = Bytes::from_static(br#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#);
    let (_, response) = parse_request(&state, "http:test", &body).await;
    assert_eq!(to_json(&response.unwrap())["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn tools_call_returns_text_and_structured_content() {
    let server = memory_server();
    let state = state(&server, 4096);
    let body = Bytes::from_static(
        br#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"domain_info","arguments":{"name":"db-01"}}}"#,
    );
    let (status, response) = parse_request(&state, "http:test", &body).await;
    let value = to_json(&response.unwrap());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["result"]["structuredContent"]["name"], json!("db-01"));
    assert_eq!(value["result"]["structuredContent"]["state"], json!("shutoff"));
    assert_eq!(value["result"]["isError"], json!(false));
    let text = value["result"]["content"][0]["text"].as_str().unwrap();
    let reparsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(reparsed, value["result"]["structuredContent"]);
}

#[tokio::test]
async fn tools_call_without_name_is_invalid_params() {
    let server = memory_server();
    let state = state(&server, 4096);
    let body = Bytes::from_static(br#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}"#);
    let (status, response) = parse_request(&state, "http:test", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(to_json(&response.unwrap())["error"]["code"], json!(-32602));
}
