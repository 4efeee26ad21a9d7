// crates/virt-gate-core/src/core/audit.rs
// ============================================================================
// Module: Virt Gate Audit Events
// Description: Audit event payloads and parameter redaction.
// Purpose: Describe one audited operation attempt as a serializable record.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Each operation attempt produces one [`AuditEvent`]. The audit log wraps it
//! in an [`AuditRecord`] carrying the sequence number assigned at write time.
//!
//! Parameters are redacted before they enter an event: credential-like keys
//! are masked and XML payloads are reduced to their size.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::catalog::OperationSpec;
use crate::core::catalog::ParamKind;
use crate::core::identifiers::CallerContext;
use crate::core::identifiers::OperationName;
use crate::core::request::OperationParams;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Final outcome of an audited attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Rejected before reaching the backend.
    Denied,
    /// Failed at or after the backend boundary.
    Error,
    /// Completed successfully.
    Success,
}

/// Sub-kind refining an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDetail {
    /// Backend call completed.
    Completed,
    /// Request failed schema validation.
    Invalid,
    /// Operation not allowed by policy.
    Permission,
    /// Concurrency limit or acquisition timeout.
    Throttled,
    /// Mutating operation refused in read-only mode.
    ReadOnly,
    /// Backend connection could not be established.
    BackendUnavailable,
    /// Backend reported an operation error.
    Backend,
    /// Caller cancelled or abandoned the call.
    Cancelled,
}

/// Audit event for one operation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// Requested operation.
    pub operation: OperationName,
    /// Caller context.
    pub caller: CallerContext,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Outcome sub-kind.
    pub detail: OutcomeDetail,
    /// Error message when the attempt failed.
    pub error: Option<String>,
    /// Redacted parameters.
    pub params: Value,
    /// Attempt start (milliseconds since epoch).
    pub started_at_ms: u128,
    /// Attempt duration in milliseconds.
    pub duration_ms: u64,
    /// Policy snapshot generation used for authorization.
    pub policy_generation: u64,
}

/// Audit event as written to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Event identifier.
    pub event: &'static str,
    /// Sequence number; consecutive, never reused.
    pub seq: u64,
    /// Write time (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Event payload.
    #[serde(flatten)]
    pub payload: AuditEvent,
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Replacement for masked values.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "secret", "token", "key", "auth"];

/// Strings longer than this are recorded by size only.
const MAX_RECORDED_STRING_BYTES: usize = 256;

/// Redacts request parameters for audit output.
///
/// Sensitive keys are masked at any depth. Parameters declared as XML by
/// `spec`, and any other string longer than a short limit, are replaced by a
/// size marker.
#[must_use]
pub fn redact_params(params: &OperationParams, spec: Option<&OperationSpec>) -> Value {
    let mut redacted = Map::new();
    for (key, value) in params {
        let is_xml = spec.and_then(|spec| spec.param(key)).is_some_and(|param| param.kind == ParamKind::Xml);
        let entry = if is_sensitive_key(key) {
            Value::String(REDACTED.to_string())
        } else if is_xml {
            Value::String(format!("[xml: {} bytes]", value.as_str().map_or(0, str::len)))
        } else {
            redact_value(value)
        };
        redacted.insert(key.clone(), entry);
    }
    Value::Object(redacted)
}

/// Returns true when a key name suggests credential material.
fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|fragment| lowered.contains(fragment))
}

/// Recursively redacts nested values.
fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| {
                    let entry = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(nested)
                    };
                    (key.clone(), entry)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(text) if text.len() > MAX_RECORDED_STRING_BYTES => {
            Value::String(format!("[{} bytes]", text.len()))
        }
        other => other.clone(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
