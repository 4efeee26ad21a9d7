// crates/virt-gate-providers/src/params.rs
// ============================================================================
// Module: Parameter Access
// Description: Typed accessors for validated operation parameters.
// Purpose: Read gateway-validated parameters without re-implementing checks.
// Dependencies: virt-gate-core, serde_json
// ============================================================================

//! ## Overview
//! The gateway validates every parameter and fills in defaults before a
//! backend sees the request, so a missing or mistyped value here means the
//! caller bypassed the gateway. Those cases fail as operation errors.

use serde_json::Value;
use virt_gate_core::BackendError;
use virt_gate_core::OperationParams;

/// Returns a required string parameter.
///
/// # Errors
///
/// Returns an operation error when the parameter is absent or not a string.
pub fn string<'a>(params: &'a OperationParams, name: &str) -> Result<&'a str, BackendError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::operation(format!("missing string parameter `{name}`")))
}

/// Returns a boolean parameter, `false` when absent.
#[must_use]
pub fn flag(params: &OperationParams, name: &str) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Returns a boolean parameter with an explicit fallback.
#[must_use]
pub fn flag_or(params: &OperationParams, name: &str, fallback: bool) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(fallback)
}

/// Returns a string-list parameter; non-string entries are skipped.
#[must_use]
pub fn strings(params: &OperationParams, name: &str) -> Vec<String> {
    params
        .get(name)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(ToString::to_string).collect())
        .unwrap_or_default()
}
