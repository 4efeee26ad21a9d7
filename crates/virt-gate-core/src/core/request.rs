// crates/virt-gate-core/src/core/request.rs
// ============================================================================
// Module: Virt Gate Requests
// Description: Operation request and result values.
// Purpose: Carry one inbound call through the gateway pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An [`OperationRequest`] is created per inbound call and discarded once the
//! call completes. Parameters are an ordered string-keyed JSON map so audit
//! output and backend argument order stay deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::CallerContext;
use crate::core::identifiers::OperationName;
use crate::core::time::unix_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Operation parameters keyed by name.
pub type OperationParams = BTreeMap<String, Value>;

/// Inbound request for one gated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Requested operation.
    pub operation: OperationName,
    /// Caller-supplied parameters.
    pub params: OperationParams,
    /// Caller context recorded in the audit trail.
    pub caller: CallerContext,
    /// Request creation time (milliseconds since epoch).
    pub requested_at_ms: u128,
    /// Limiter acquisition timeout overriding the gateway default.
    pub acquire_timeout: Option<Duration>,
}

impl OperationRequest {
    /// Creates a request with no parameters.
    #[must_use]
    pub fn new(operation: impl Into<OperationName>, caller: impl Into<CallerContext>) -> Self {
        Self {
            operation: operation.into(),
            params: OperationParams::new(),
            caller: caller.into(),
            requested_at_ms: unix_millis(),
            acquire_timeout: None,
        }
    }

    /// Replaces the parameter map.
    #[must_use]
    pub fn with_params(mut self, params: OperationParams) -> Self {
        self.params = params;
        self
    }

    /// Sets one parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Overrides the limiter acquisition timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// Successful operation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    /// Executed operation.
    pub operation: OperationName,
    /// Policy snapshot generation that authorized the call.
    pub policy_generation: u64,
    /// Wall time from admission to completion in milliseconds.
    pub duration_ms: u64,
    /// Backend payload.
    pub output: Value,
}
