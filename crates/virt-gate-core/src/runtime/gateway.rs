// crates/virt-gate-core/src/runtime/gateway.rs
// ============================================================================
// Module: Virt Gate Operation Gateway
// Description: Per-request orchestration of validation, policy, limits, and backend calls.
// Purpose: Provide the single entry point through which callers reach the backend.
// Dependencies: crate::{core, interfaces, runtime}, thiserror, tokio-util, tracing
// ============================================================================

//! ## Overview
//! [`OperationGateway::execute`] runs a request through, in order:
//!
//! 1. schema validation against the operation catalog,
//! 2. the permission check against one policy snapshot,
//! 3. limiter admission,
//! 4. the backend call through the connection manager,
//! 5. audit recording of the outcome.
//!
//! A well-formed name missing from the catalog is checked against the policy
//! before it is reported as unknown, so callers learn nothing about the
//! catalog from names they may not use.
//!
//! Any failure short-circuits the remaining steps. When auditing is enabled
//! each request produces exactly one audit event, including requests whose
//! future is dropped or cancelled mid-flight.
//!
//! Security posture: no request reaches the backend without a passing
//! permission check evaluated strictly before the call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::core::audit::AuditEvent;
use crate::core::audit::AuditOutcome;
use crate::core::audit::OutcomeDetail;
use crate::core::audit::redact_params;
use crate::core::catalog::OperationSpec;
use crate::core::request::OperationParams;
use crate::core::request::OperationRequest;
use crate::core::request::OperationResult;
use crate::core::time::duration_millis;
use crate::core::time::unix_millis;
use crate::core::validation::ValidationError;
use crate::core::validation::validate_request;
use crate::interfaces::BackendErrorKind;
use crate::interfaces::BackendSession;
use crate::runtime::audit::AuditLog;
use crate::runtime::connection::ConnectionError;
use crate::runtime::connection::ConnectionManager;
use crate::runtime::connection::ConnectionState;
use crate::runtime::limiter::ConcurrencyLimiter;
use crate::runtime::limiter::DEFAULT_ACQUIRE_TIMEOUT;
use crate::runtime::limiter::LimiterError;
use crate::runtime::policy::PermissionPolicy;
use crate::runtime::policy::PermissionRegistry;
use crate::runtime::policy::PolicyError;
use crate::runtime::policy::PolicySnapshot;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Gateway tuning not carried by the permission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Limiter wait applied when a request does not set its own.
    pub default_acquire_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway failures returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Request failed schema validation.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Operation not allowed by the current policy.
    #[error("operation {operation} is not permitted")]
    PermissionDenied {
        /// Denied operation.
        operation: String,
    },
    /// Concurrency limit reached and the caller did not wait.
    #[error("concurrency limit of {limit} operations reached")]
    LimitExceeded {
        /// Bound in force.
        limit: usize,
    },
    /// No operation slot freed up before the deadline.
    #[error("timed out after {waited_ms} ms waiting for an operation slot")]
    Timeout {
        /// Time spent waiting in milliseconds.
        waited_ms: u64,
    },
    /// Mutating operation refused in read-only mode.
    #[error("operation {operation} is refused: backend is read-only")]
    ReadOnly {
        /// Refused operation.
        operation: String,
    },
    /// Backend connection could not be established within the retry budget.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// Backend reported an operation error, or lost the session during a
    /// mutating call whose outcome is therefore unknown.
    #[error("backend {kind} error: {message}")]
    Backend {
        /// Backend failure classification.
        kind: BackendErrorKind,
        /// Backend failure description.
        message: String,
    },
    /// Caller cancelled the request.
    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Returns the stable kind tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::ReadOnly { .. } => "read_only",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Backend { .. } => "backend_operation_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when the caller may retry with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. } | Self::Timeout { .. } | Self::BackendUnavailable(_))
    }

    /// Returns the audit outcome recorded for this failure.
    #[must_use]
    pub const fn audit_outcome(&self) -> (AuditOutcome, OutcomeDetail) {
        match self {
            Self::Validation(_) => (AuditOutcome::Denied, OutcomeDetail::Invalid),
            Self::PermissionDenied { .. } => (AuditOutcome::Denied, OutcomeDetail::Permission),
            Self::LimitExceeded { .. } | Self::Timeout { .. } => (AuditOutcome::Denied, OutcomeDetail::Throttled),
            Self::ReadOnly { .. } => (AuditOutcome::Denied, OutcomeDetail::ReadOnly),
            Self::BackendUnavailable(_) => (AuditOutcome::Error, OutcomeDetail::BackendUnavailable),
            Self::Backend { .. } => (AuditOutcome::Error, OutcomeDetail::Backend),
            Self::Cancelled => (AuditOutcome::Error, OutcomeDetail::Cancelled),
        }
    }

    /// Maps a connection-layer failure for the given operation.
    fn from_connection(err: ConnectionError, operation: &str) -> Self {
        match err {
            ConnectionError::ReadOnly { .. } => Self::ReadOnly {
                operation: operation.to_string(),
            },
            ConnectionError::Unavailable { reason } => Self::BackendUnavailable(reason),
            ConnectionError::Interrupted { reason, .. } => Self::Backend {
                kind: BackendErrorKind::Connection,
                message: format!("outcome unknown, connection lost mid-call: {reason}"),
            },
            ConnectionError::Backend(err) => Self::Backend {
                kind: err.kind(),
                message: err.message().to_string(),
            },
            ConnectionError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<LimiterError> for GatewayError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::LimitExceeded { limit } => Self::LimitExceeded { limit },
            LimiterError::Timeout { waited_ms } => Self::Timeout { waited_ms },
        }
    }
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Point-in-time gateway status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    /// Connection state.
    pub connection_state: ConnectionState,
    /// Current session generation.
    pub connection_generation: u64,
    /// Total connect attempts made.
    pub connect_attempts: u64,
    /// Whether the backend is read-only.
    pub readonly: bool,
    /// Leases currently held.
    pub in_flight: usize,
    /// Current concurrency bound.
    pub max_concurrent_operations: usize,
    /// Current policy generation.
    pub policy_generation: u64,
    /// Whether auditing is enabled.
    pub audit_enabled: bool,
    /// Last assigned audit sequence number.
    pub audit_last_sequence: u64,
    /// Failed audit writes.
    pub audit_write_failures: u64,
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Orchestrator for gated backend operations.
pub struct OperationGateway {
    /// Allow-list snapshots.
    registry: PermissionRegistry,
    /// In-flight bound.
    limiter: ConcurrencyLimiter,
    /// Backend session owner.
    connection: ConnectionManager,
    /// Audit trail.
    audit: AuditLog,
    /// Gateway tuning.
    config: GatewayConfig,
}

impl OperationGateway {
    /// Builds a gateway from its components.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the policy does not compile.
    pub fn new(
        policy: PermissionPolicy,
        connection: ConnectionManager,
        audit: AuditLog,
        config: GatewayConfig,
    ) -> Result<Self, PolicyError> {
        let registry = PermissionRegistry::new(policy)?;
        let limiter = ConcurrencyLimiter::new(registry.snapshot().max_concurrent_operations());
        Ok(Self {
            registry,
            limiter,
            connection,
            audit,
            config,
        })
    }

    /// Executes a request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for the first failing pipeline step.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationResult, GatewayError> {
        self.execute_with_cancel(request, &CancellationToken::new()).await
    }

    /// Executes a request that the caller may cancel.
    ///
    /// Cancellation is observed while queued for a slot, while connecting,
    /// and during the backend call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for the first failing pipeline step, or
    /// [`GatewayError::Cancelled`].
    pub async fn execute_with_cancel(
        &self,
        request: OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, GatewayError> {
        let snapshot = self.registry.snapshot();
        let mut audit = AuditGuard::begin(&self.audit, &snapshot, &request);

        let (spec, params) = match validate_request(&request.operation, &request.params) {
            Ok(validated) => validated,
            Err(ValidationError::UnknownOperation(operation)) if !snapshot.is_allowed(&operation) => {
                info!(operation = %operation, caller = %request.caller, "operation denied by policy");
                return Err(audit.fail(GatewayError::PermissionDenied {
                    operation,
                }));
            }
            Err(err) => return Err(audit.fail(GatewayError::Validation(err.to_string()))),
        };
        audit.attach_spec(spec, &request.params);

        if !snapshot.is_allowed(spec.name) {
            info!(operation = spec.name, caller = %request.caller, "operation denied by policy");
            return Err(audit.fail(GatewayError::PermissionDenied {
                operation: spec.name.to_string(),
            }));
        }

        let timeout = request.acquire_timeout.unwrap_or(self.config.default_acquire_timeout);
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            acquired = self.limiter.acquire(timeout) => acquired.map_err(GatewayError::from),
        };
        let lease = match acquired {
            Ok(lease) => lease,
            Err(err) => return Err(audit.fail(err)),
        };

        let admitted = Instant::now();
        let outcome = self.call_backend(spec, &params, cancel).await;
        lease.release();

        match outcome {
            Ok(output) => {
                let duration_ms = duration_millis(admitted.elapsed());
                debug!(operation = spec.name, duration_ms, "operation completed");
                audit.succeed();
                Ok(OperationResult {
                    operation: request.operation,
                    policy_generation: snapshot.generation(),
                    duration_ms,
                    output,
                })
            }
            Err(err) => Err(audit.fail(GatewayError::from_connection(err, spec.name))),
        }
    }

    /// Replaces the permission policy and rebounds the limiter.
    ///
    /// Returns the new policy generation. In-flight requests finish under
    /// the snapshot they started with.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the policy does not compile; the
    /// previous policy stays in force.
    pub fn reload_policy(&self, policy: PermissionPolicy) -> Result<u64, PolicyError> {
        let snapshot = self.registry.reload(policy)?;
        self.limiter.set_limit(snapshot.max_concurrent_operations());
        Ok(snapshot.generation())
    }

    /// Establishes the backend session eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] when no session could be
    /// established.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        self.connection
            .connect(&CancellationToken::new())
            .await
            .map_err(|err| GatewayError::from_connection(err, "connect"))
    }

    /// Returns a point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        let snapshot = self.registry.snapshot();
        GatewayStatus {
            connection_state: self.connection.state(),
            connection_generation: self.connection.generation(),
            connect_attempts: self.connection.connect_attempts(),
            readonly: self.connection.settings().readonly,
            in_flight: self.limiter.in_flight(),
            max_concurrent_operations: self.limiter.limit(),
            policy_generation: snapshot.generation(),
            audit_enabled: snapshot.audit_enabled(),
            audit_last_sequence: self.audit.last_sequence(),
            audit_write_failures: self.audit.write_failures(),
        }
    }

    /// Returns the current policy snapshot.
    #[must_use]
    pub fn policy(&self) -> Arc<PolicySnapshot> {
        self.registry.snapshot()
    }

    /// Returns the connection manager.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Returns the limiter.
    #[must_use]
    pub const fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Closes the backend session.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }

    /// Runs the validated operation on the managed session.
    async fn call_backend(
        &self,
        spec: &'static OperationSpec,
        params: &OperationParams,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ConnectionError> {
        self.connection
            .with_connection(spec.class, cancel, move |session: Arc<dyn BackendSession>| async move {
                session.call(spec, params).await
            })
            .await
    }
}

// ============================================================================
// SECTION: Audit Guard
// ============================================================================

/// Records exactly one audit event per request.
///
/// A guard dropped without an outcome records the request as cancelled.
struct AuditGuard<'a> {
    /// Destination log.
    log: &'a AuditLog,
    /// Pending event; `None` when auditing is off or already recorded.
    pending: Option<AuditEvent>,
    /// Request start.
    started: Instant,
}

impl<'a> AuditGuard<'a> {
    /// Starts an audit record for a request.
    fn begin(log: &'a AuditLog, snapshot: &PolicySnapshot, request: &OperationRequest) -> Self {
        let pending = snapshot.audit_enabled().then(|| AuditEvent {
            operation: request.operation.clone(),
            caller: request.caller.clone(),
            outcome: AuditOutcome::Error,
            detail: OutcomeDetail::Cancelled,
            error: None,
            params: redact_params(&request.params, None),
            started_at_ms: unix_millis(),
            duration_ms: 0,
            policy_generation: snapshot.generation(),
        });
        Self {
            log,
            pending,
            started: Instant::now(),
        }
    }

    /// Re-redacts parameters with the operation schema known.
    fn attach_spec(&mut self, spec: &OperationSpec, params: &OperationParams) {
        if let Some(event) = &mut self.pending {
            event.params = redact_params(params, Some(spec));
        }
    }

    /// Records a failure and hands the error back.
    fn fail(mut self, err: GatewayError) -> GatewayError {
        let (outcome, detail) = err.audit_outcome();
        self.finish(outcome, detail, Some(err.to_string()));
        err
    }

    /// Records a success.
    fn succeed(mut self) {
        self.finish(AuditOutcome::Success, OutcomeDetail::Completed, None);
    }

    /// Writes the pending event once.
    fn finish(&mut self, outcome: AuditOutcome, detail: OutcomeDetail, error: Option<String>) {
        if let Some(mut event) = self.pending.take() {
            event.outcome = outcome;
            event.detail = detail;
            event.error = error;
            event.duration_ms = duration_millis(self.started.elapsed());
            self.log.record(event);
        }
    }
}

impl Drop for AuditGuard<'_> {
    fn drop(&mut self) {
        self.finish(
            AuditOutcome::Error,
            OutcomeDetail::Cancelled,
            Some("request abandoned before completion".to_string()),
        );
    }
}
