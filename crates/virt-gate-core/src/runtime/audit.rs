// crates/virt-gate-core/src/runtime/audit.rs
// ============================================================================
// Module: Virt Gate Audit Log
// Description: Sequenced, best-effort audit recording.
// Purpose: Assign gap-detectable sequence numbers and shield callers from sink failures.
// Dependencies: crate::{core, interfaces}, tokio, tracing
// ============================================================================

//! ## Overview
//! [`AuditLog`] assigns sequence numbers under the same mutex that serializes
//! sink writes, so sequence order equals write order. A failed write still
//! consumes its sequence number; readers of the trail see the gap. Sink
//! failures are logged and counted, never returned to the operation path.
//!
//! Recording is synchronous and runs inside every gateway request, so a
//! sink write is paid on the request's worker thread while the sequence
//! mutex is held. Sinks that report [`AuditSink::performs_blocking_io`] are
//! written through [`tokio::task::block_in_place`] on a multi-thread runtime,
//! which moves other tasks off the worker for the duration of the write. On
//! a current-thread runtime, or outside any runtime, the write runs inline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::runtime::Handle;
use tokio::runtime::RuntimeFlavor;
use tracing::warn;

use crate::core::audit::AuditEvent;
use crate::core::audit::AuditRecord;
use crate::core::time::unix_millis;
use crate::interfaces::AuditSink;
use crate::interfaces::AuditSinkError;

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Event identifier written on every operation record.
pub const OPERATION_EVENT: &str = "virt_gate_operation";

/// Sequencing front end over an [`AuditSink`].
pub struct AuditLog {
    /// Destination sink.
    sink: Arc<dyn AuditSink>,
    /// Last assigned sequence number; guards the write as well.
    last_seq: Mutex<u64>,
    /// Count of failed writes.
    failures: AtomicU64,
}

impl AuditLog {
    /// Creates an audit log writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            last_seq: Mutex::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Records an event and returns its sequence number.
    pub fn record(&self, event: AuditEvent) -> u64 {
        if self.sink.performs_blocking_io() && on_multi_thread_runtime() {
            tokio::task::block_in_place(|| self.write_next(event))
        } else {
            self.write_next(event)
        }
    }

    /// Assigns the next sequence number and writes the record under the lock.
    fn write_next(&self, event: AuditEvent) -> u64 {
        let mut last_seq = self.last_seq.lock().unwrap_or_else(PoisonError::into_inner);
        *last_seq += 1;
        let record = AuditRecord {
            event: OPERATION_EVENT,
            seq: *last_seq,
            timestamp_ms: unix_millis(),
            payload: event,
        };
        if let Err(err) = self.sink.write(&record) {
            self.failures.fetch_add(1, Ordering::AcqRel);
            warn!(
                target: "virt_gate::audit",
                seq = record.seq,
                operation = %record.payload.operation,
                error = %err,
                "audit sink write failed"
            );
        }
        record.seq
    }

    /// Returns the last assigned sequence number (0 when nothing was recorded).
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        *self.last_seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of failed sink writes.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }
}

/// Returns true when called from a multi-thread tokio runtime.
fn on_multi_thread_runtime() -> bool {
    Handle::try_current().is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    /// Recorded entries in write order.
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded entries.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record.clone());
        Ok(())
    }
}

/// Sink that discards records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn write(&self, _record: &AuditRecord) -> Result<(), AuditSinkError> {
        Ok(())
    }
}
