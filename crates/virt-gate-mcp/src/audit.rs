// crates/virt-gate-mcp/src/audit.rs
// ============================================================================
// Module: MCP Audit Sinks
// Description: JSON-lines audit sinks for files and stderr.
// Purpose: Persist gateway audit records outside the process.
// Dependencies: virt-gate-core, virt-gate-config, serde_json
// ============================================================================

//! ## Overview
//! Gateway audit records are written one JSON object per line. The file sink
//! appends and flushes after every record so a crash loses at most the line
//! being written. The stderr sink is the fallback when no audit path is
//! configured; stdout is never used because it carries the stdio transport.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use virt_gate_config::AuditConfig;
use virt_gate_core::AuditRecord;
use virt_gate_core::AuditSink;
use virt_gate_core::AuditSinkError;

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        let payload = encode(record)?;
        let mut file =
            self.file.lock().map_err(|_| AuditSinkError::Io("audit file lock poisoned".to_string()))?;
        writeln!(file, "{payload}").map_err(|err| AuditSinkError::Io(err.to_string()))?;
        file.flush().map_err(|err| AuditSinkError::Io(err.to_string()))
    }

    fn performs_blocking_io(&self) -> bool {
        true
    }
}

/// Audit sink that writes JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        let payload = encode(record)?;
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{payload}").map_err(|err| AuditSinkError::Io(err.to_string()))
    }
}

/// Builds the sink selected by the audit configuration.
///
/// # Errors
///
/// Returns an error when the configured audit file cannot be opened.
pub fn build_audit_sink(config: &AuditConfig) -> io::Result<Arc<dyn AuditSink>> {
    match config.path.as_deref() {
        Some(path) => Ok(Arc::new(FileAuditSink::new(Path::new(path))?)),
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

/// Encodes a record as one JSON line.
fn encode(record: &AuditRecord) -> Result<String, AuditSinkError> {
    serde_json::to_string(record).map_err(|err| AuditSinkError::Encode(err.to_string()))
}
