// crates/virt-gate-core/tests/audit.rs
// ============================================================================
// Module: Audit Log Tests
// Description: Tests for sequence assignment and sink failure handling.
// Purpose: Validate gap-detectable sequencing under concurrency and failures.
// Dependencies: virt-gate-core, serde_json
// ============================================================================

//! Audit log tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use serde_json::json;
use virt_gate_core::AuditEvent;
use virt_gate_core::AuditLog;
use virt_gate_core::AuditOutcome;
use virt_gate_core::AuditRecord;
use virt_gate_core::AuditSink;
use virt_gate_core::AuditSinkError;
use virt_gate_core::CallerContext;
use virt_gate_core::InMemoryAuditSink;
use virt_gate_core::OperationName;
use virt_gate_core::OutcomeDetail;

fn event(operation: &str) -> AuditEvent {
    AuditEvent {
        operation: OperationName::new(operation),
        caller: CallerContext::new("test"),
        outcome: AuditOutcome::Success,
        detail: OutcomeDetail::Completed,
        error: None,
        params: json!({}),
        started_at_ms: 0,
        duration_ms: 1,
        policy_generation: 1,
    }
}

/// Sink that fails every write whose sequence number is listed.
struct FlakySink {
    fail_on: Vec<u64>,
    written: Mutex<Vec<u64>>,
}

impl AuditSink for FlakySink {
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        if self.fail_on.contains(&record.seq) {
            return Err(AuditSinkError::Io("disk full".to_string()));
        }
        self.written.lock().unwrap().push(record.seq);
        Ok(())
    }
}

#[test]
fn sequence_numbers_start_at_one_and_increase() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let log = AuditLog::new(sink.clone());
    assert_eq!(log.last_sequence(), 0);
    assert_eq!(log.record(event("domain.list")), 1);
    assert_eq!(log.record(event("domain.info")), 2);

    let records = sink.records();
    assert_eq!(records.iter().map(|record| record.seq).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(records[1].payload.operation.as_str(), "domain.info");
}

#[test]
fn failed_writes_leave_a_gap_and_are_counted() {
    let sink = Arc::new(FlakySink {
        fail_on: vec![2],
        written: Mutex::new(Vec::new()),
    });
    let log = AuditLog::new(sink.clone());
    for _ in 0..3 {
        log.record(event("host.info"));
    }
    assert_eq!(*sink.written.lock().unwrap(), vec![1, 3]);
    assert_eq!(log.write_failures(), 1);
    assert_eq!(log.last_sequence(), 3);
}

#[test]
fn concurrent_writers_produce_consecutive_sequences_in_write_order() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let log = Arc::new(AuditLog::new(sink.clone()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for _ in 0..25 {
                    log.record(event("domain.stats"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let sequences: Vec<u64> = sink.records().iter().map(|record| record.seq).collect();
    assert_eq!(sequences, (1..=200).collect::<Vec<_>>());
}

/// Sink that reports blocking I/O and remembers the thread of each write.
#[derive(Default)]
struct BlockingSink {
    writes: Mutex<Vec<(u64, thread::ThreadId)>>,
}

impl AuditSink for BlockingSink {
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        thread::sleep(std::time::Duration::from_millis(2));
        self.writes.lock().unwrap().push((record.seq, thread::current().id()));
        Ok(())
    }

    fn performs_blocking_io(&self) -> bool {
        true
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_sink_keeps_write_order_on_multi_thread_runtime() {
    let sink = Arc::new(BlockingSink::default());
    let log = Arc::new(AuditLog::new(sink.clone()));
    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                for _ in 0..5 {
                    log.record(event("domain.info"));
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    let sequences: Vec<u64> = sink.writes.lock().unwrap().iter().map(|(seq, _)| *seq).collect();
    assert_eq!(sequences, (1..=30).collect::<Vec<_>>());
    assert_eq!(log.last_sequence(), 30);
}

#[tokio::test]
async fn blocking_sink_writes_inline_on_current_thread_runtime() {
    let sink = Arc::new(BlockingSink::default());
    let log = AuditLog::new(sink.clone());
    assert_eq!(log.record(event("host.info")), 1);
    let writes = sink.writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, thread::current().id());
}

#[test]
fn in_memory_sink_does_not_report_blocking_io() {
    assert!(!InMemoryAuditSink::new().performs_blocking_io());
}

#[test]
fn records_serialize_flat_with_event_tag() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let log = AuditLog::new(sink.clone());
    log.record(event("storage.list"));
    let value = serde_json::to_value(&sink.records()[0]).unwrap();
    assert_eq!(value["event"], json!("virt_gate_operation"));
    assert_eq!(value["seq"], json!(1));
    assert_eq!(value["operation"], json!("storage.list"));
    assert_eq!(value["outcome"], json!("success"));
    assert_eq!(value["detail"], json!("completed"));
}
