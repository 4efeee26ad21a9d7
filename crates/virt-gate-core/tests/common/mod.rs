// crates/virt-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Scripted backend and gateway builders for core tests.
// Purpose: Provide deterministic backend behavior for gateway scenarios.
// Dependencies: virt-gate-core, tokio
// ============================================================================

//! ## Overview
//! The scripted backend counts connects and calls, fails a configurable
//! number of connects, and plays back per-call behaviors: success,
//! connection loss, operation error, or blocking until released.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only fixtures use unwrap for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Semaphore;
use virt_gate_core::AuditLog;
use virt_gate_core::BackendConnector;
use virt_gate_core::BackendError;
use virt_gate_core::BackendSession;
use virt_gate_core::ConnectTarget;
use virt_gate_core::ConnectionManager;
use virt_gate_core::ConnectionSettings;
use virt_gate_core::GatewayConfig;
use virt_gate_core::InMemoryAuditSink;
use virt_gate_core::OperationGateway;
use virt_gate_core::OperationParams;
use virt_gate_core::OperationSpec;
use virt_gate_core::PermissionPolicy;
use virt_gate_core::RetryPolicy;

// ============================================================================
// SECTION: Scripted Backend
// ============================================================================

/// Behavior of one backend call.
#[derive(Debug, Clone)]
pub enum CallBehavior {
    /// Return `{"operation": <name>, "session": <id>}`.
    Succeed,
    /// Fail with a connection-class error.
    ConnectionLost,
    /// Fail with an operation error.
    Fail(String),
    /// Wait for [`ScriptedBackend::release_blocked`], then succeed.
    Block,
}

/// Shared script state.
#[derive(Debug)]
struct Script {
    connects: AtomicU32,
    failing_connects: AtomicU32,
    connect_delay: Mutex<Duration>,
    calls: Mutex<Vec<(String, u32)>>,
    queued: Mutex<VecDeque<CallBehavior>>,
    fallback: Mutex<CallBehavior>,
    started: Semaphore,
    hold: Semaphore,
    closed: AtomicU32,
}

/// Backend connector and session factory driven by a script.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    script: Arc<Script>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Creates a backend whose calls succeed.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script {
                connects: AtomicU32::new(0),
                failing_connects: AtomicU32::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                calls: Mutex::new(Vec::new()),
                queued: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(CallBehavior::Succeed),
                started: Semaphore::new(0),
                hold: Semaphore::new(0),
                closed: AtomicU32::new(0),
            }),
        }
    }

    /// Fails the next `count` connect attempts.
    pub fn fail_connects(&self, count: u32) {
        self.script.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Delays every connect attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.script.connect_delay.lock().unwrap() = delay;
    }

    /// Queues behaviors for the next calls.
    pub fn push(&self, behaviors: impl IntoIterator<Item = CallBehavior>) {
        self.script.queued.lock().unwrap().extend(behaviors);
    }

    /// Sets the behavior used once the queue is empty.
    pub fn set_fallback(&self, behavior: CallBehavior) {
        *self.script.fallback.lock().unwrap() = behavior;
    }

    /// Lets `count` blocked calls complete.
    pub fn release_blocked(&self, count: usize) {
        self.script.hold.add_permits(count);
    }

    /// Waits until `count` blocking calls have started.
    pub async fn wait_blocked(&self, count: u32) {
        self.script.started.acquire_many(count).await.unwrap().forget();
    }

    /// Returns the number of connect attempts.
    pub fn connects(&self) -> u32 {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of sessions closed.
    pub fn closed_sessions(&self) -> u32 {
        self.script.closed.load(Ordering::SeqCst)
    }

    /// Returns `(operation, session id)` for every call that reached the backend.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.script.calls.lock().unwrap().clone()
    }

    /// Returns the operation names that reached the backend.
    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl BackendConnector for ScriptedBackend {
    async fn connect(&self, _target: &ConnectTarget) -> Result<Arc<dyn BackendSession>, BackendError> {
        let id = self.script.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.script.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.script.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.script.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(BackendError::connection("hypervisor unreachable"));
        }
        Ok(Arc::new(ScriptedSession {
            script: Arc::clone(&self.script),
            id,
        }))
    }
}

/// Session handed out by [`ScriptedBackend`].
struct ScriptedSession {
    script: Arc<Script>,
    id: u32,
}

#[async_trait]
impl BackendSession for ScriptedSession {
    async fn call(&self, operation: &OperationSpec, _params: &OperationParams) -> Result<Value, BackendError> {
        self.script.calls.lock().unwrap().push((operation.name.to_string(), self.id));
        let behavior = {
            let next = self.script.queued.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.script.fallback.lock().unwrap().clone())
        };
        match behavior {
            CallBehavior::Succeed => Ok(json!({"operation": operation.name, "session": self.id})),
            CallBehavior::ConnectionLost => Err(BackendError::connection("connection reset by peer")),
            CallBehavior::Fail(message) => Err(BackendError::operation(message)),
            CallBehavior::Block => {
                self.script.started.add_permits(1);
                self.script.hold.acquire().await.unwrap().forget();
                Ok(json!({"operation": operation.name, "session": self.id}))
            }
        }
    }

    async fn close(&self) {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Connection settings with fast retries for tests.
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        uri: "test:///default".to_string(),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        ..ConnectionSettings::default()
    }
}

/// Policy allowing the given patterns.
pub fn policy(allowed: &[&str], max_concurrent: usize) -> PermissionPolicy {
    PermissionPolicy {
        allowed_operations: allowed.iter().map(ToString::to_string).collect(),
        exact_only_operations: Vec::new(),
        audit_enabled: true,
        max_concurrent_operations: max_concurrent,
    }
}

/// Gateway wired to a scripted backend and an in-memory audit sink.
pub struct Harness {
    pub gateway: Arc<OperationGateway>,
    pub backend: ScriptedBackend,
    pub audit: Arc<InMemoryAuditSink>,
}

/// Builds a harness with the given policy and settings.
pub fn harness_with(policy: PermissionPolicy, settings: ConnectionSettings, config: GatewayConfig) -> Harness {
    let backend = ScriptedBackend::new();
    let audit = Arc::new(InMemoryAuditSink::new());
    let connection = ConnectionManager::new(Arc::new(backend.clone()), settings);
    let gateway = OperationGateway::new(policy, connection, AuditLog::new(audit.clone()), config).unwrap();
    Harness {
        gateway: Arc::new(gateway),
        backend,
        audit,
    }
}

/// Builds a harness with default gateway configuration.
pub fn harness(policy: PermissionPolicy) -> Harness {
    harness_with(policy, fast_settings(), GatewayConfig::default())
}
