// crates/virt-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Virt Gate Interfaces
// Description: Backend-agnostic interfaces for hypervisor access and auditing.
// Purpose: Define the contract surfaces used by the Virt Gate runtime.
// Dependencies: crate::core, async-trait, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the gateway reaches a hypervisor and where audit
//! records go without embedding backend details. A [`BackendConnector`]
//! opens sessions; a [`BackendSession`] executes catalog operations; an
//! [`AuditSink`] persists audit records.
//!
//! Backends classify their failures through [`BackendError::kind`]; only
//! [`BackendErrorKind::Connection`] causes the connection manager to treat
//! the session as lost.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::audit::AuditRecord;
use crate::core::catalog::OperationSpec;
use crate::core::request::OperationParams;

// ============================================================================
// SECTION: Backend Errors
// ============================================================================

/// Classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Session lost or unreachable; reconnect-worthy.
    Connection,
    /// Referenced resource does not exist.
    NotFound,
    /// Backend rejected or failed the operation.
    Operation,
}

impl BackendErrorKind {
    /// Returns the stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::NotFound => "not_found",
            Self::Operation => "operation",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend failure with a classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct BackendError {
    /// Failure classification.
    kind: BackendErrorKind,
    /// Failure description.
    message: String,
}

impl BackendError {
    /// Creates a backend error.
    #[must_use]
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a connection-class error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    /// Creates an operation error.
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Operation, message)
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true when the session should be treated as lost.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self.kind, BackendErrorKind::Connection)
    }
}

// ============================================================================
// SECTION: Backend Connector
// ============================================================================

/// Parameters for opening a backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Hypervisor connection URI.
    pub uri: String,
    /// Open the session in read-only mode.
    pub readonly: bool,
    /// Per-call timeout the session should honor for its own I/O.
    pub call_timeout: Duration,
}

/// Opens sessions to a privileged backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the backend cannot be reached.
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn BackendSession>, BackendError>;
}

/// Live backend session executing catalog operations.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Executes one catalog operation with validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] classified by failure kind.
    async fn call(&self, operation: &OperationSpec, params: &OperationParams) -> Result<Value, BackendError>;

    /// Releases backend resources held by the session.
    async fn close(&self);
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit sink write failures.
#[derive(Debug, Error)]
pub enum AuditSinkError {
    /// Underlying I/O failed.
    #[error("audit sink io error: {0}")]
    Io(String),
    /// Record could not be encoded.
    #[error("audit sink encoding error: {0}")]
    Encode(String),
}

/// Append-only destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the record could not be persisted.
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;

    /// Returns true when [`AuditSink::write`] performs blocking I/O such as
    /// a file write and flush.
    fn performs_blocking_io(&self) -> bool {
        false
    }
}
