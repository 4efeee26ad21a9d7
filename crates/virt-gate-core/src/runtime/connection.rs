// crates/virt-gate-core/src/runtime/connection.rs
// ============================================================================
// Module: Virt Gate Connection Manager
// Description: Lifecycle of the single privileged backend session.
// Purpose: Connect lazily, detect loss, and reconnect with single-flight.
// Dependencies: crate::interfaces, thiserror, tokio, tokio-util, tracing
// ============================================================================

//! ## Overview
//! The [`ConnectionManager`] exclusively owns the backend session. Its state
//! machine is:
//!
//! ```text
//! Disconnected --connect ok--> Connected --connection error--> Degraded
//! Degraded --reconnect ok--> Connected
//! Degraded --reconnect fails--> Degraded (BackendUnavailable to caller)
//! any --shutdown--> Disconnected
//! ```
//!
//! `Connecting` is observable while an attempt is in flight. At most one
//! attempt runs at a time: the attempt holds the slot lock, and callers that
//! queued behind a failed attempt receive its failure instead of starting
//! their own. The cycle runs on its own task, so the caller that started it
//! may cancel without abandoning the attempt the others are waiting on. Backend calls run outside the slot lock and, unless disabled,
//! are serialized through a separate call lock.
//!
//! Read operations are replayed once after a reconnect. Mutating and
//! destructive operations are never replayed: a session lost or timed out
//! mid-call surfaces [`ConnectionError::Interrupted`], whose backend side
//! effects are unknown, rather than [`ConnectionError::Unavailable`], which
//! only reports that no session could be established.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::catalog::OperationClass;
use crate::interfaces::BackendConnector;
use crate::interfaces::BackendError;
use crate::interfaces::BackendSession;
use crate::interfaces::ConnectTarget;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default hypervisor URI.
pub const DEFAULT_BACKEND_URI: &str = "qemu:///system";

/// Default per-attempt connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connect attempts per reconnect cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay after the first failed attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Default backoff cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and none being opened.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Session is live.
    Connected,
    /// Session failed with a connection-class error; reconnect pending.
    Degraded,
}

impl ConnectionState {
    /// Encodes the state for atomic storage.
    const fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Degraded => 3,
        }
    }

    /// Decodes an atomically stored state.
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Degraded,
            _ => Self::Disconnected,
        }
    }

    /// Returns the stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

/// Bounded exponential backoff between connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per reconnect cycle (at least one).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Returns the delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff.saturating_mul(1_u32 << exponent).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Hypervisor connection URI.
    pub uri: String,
    /// Refuse mutating operations and open read-only sessions.
    pub readonly: bool,
    /// Bound on each connect attempt.
    pub connect_timeout: Duration,
    /// Bound on each backend call.
    pub call_timeout: Duration,
    /// Reconnect backoff policy.
    pub retry: RetryPolicy,
    /// Serialize backend calls over the shared session.
    pub serialize_calls: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_BACKEND_URI.to_string(),
            readonly: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
            serialize_calls: true,
        }
    }
}

/// Connection-layer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Mutating operation refused in read-only mode.
    #[error("backend is read-only; {class} operations are refused")]
    ReadOnly {
        /// Class label of the refused operation.
        class: &'static str,
    },
    /// No session could be established within the retry budget, or a
    /// replayed read lost its session again.
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Failure description.
        reason: String,
    },
    /// Session lost or timed out during a mutating or destructive call.
    #[error("backend connection lost during {class} call: {reason}")]
    Interrupted {
        /// Class label of the interrupted operation.
        class: &'static str,
        /// Failure description.
        reason: String,
    },
    /// Backend reported a non-connection error.
    #[error(transparent)]
    Backend(BackendError),
    /// Caller cancelled while waiting on the connection or the call.
    #[error("operation cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Owner of the single backend session.
pub struct ConnectionManager {
    /// State shared with detached connect cycles.
    shared: Arc<Shared>,
    /// Session slot; held for the duration of a connect cycle.
    slot: Arc<Mutex<Slot>>,
    /// Serializes backend calls when enabled.
    call_lock: Mutex<()>,
}

/// Manager state reachable from a connect cycle running on its own task.
struct Shared {
    /// Opens sessions.
    connector: Arc<dyn BackendConnector>,
    /// Static settings.
    settings: ConnectionSettings,
    /// Mirror of the state for lock-free reads.
    state: AtomicU8,
    /// Completed connect cycles; read before queueing on the slot.
    cycles: AtomicU64,
    /// Total connect attempts ever made.
    attempts: AtomicU64,
    /// Mirror of the session generation.
    generation: AtomicU64,
}

/// Session slot guarded by the slot lock.
struct Slot {
    /// Current session, if any.
    session: Option<Arc<dyn BackendSession>>,
    /// Generation of `session`; bumped on every successful connect.
    generation: u64,
    /// Session failed and must be replaced before reuse.
    degraded: bool,
    /// Outcome of the most recent failed cycle.
    last_failure: Option<FailedCycle>,
}

/// Failed connect cycle shared with callers that queued behind it.
struct FailedCycle {
    /// Cycle number that failed.
    cycle: u64,
    /// Failure description.
    reason: String,
}

/// Session lent to one call.
struct Borrowed {
    /// Shared session handle.
    session: Arc<dyn BackendSession>,
    /// Generation the handle belongs to.
    generation: u64,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(connector: Arc<dyn BackendConnector>, settings: ConnectionSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
                cycles: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
            slot: Arc::new(Mutex::new(Slot {
                session: None,
                generation: 0,
                degraded: false,
                last_failure: None,
            })),
            call_lock: Mutex::new(()),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Returns the total number of connect attempts made.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Returns the generation of the current session (0 before first connect).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Establishes a session eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Unavailable`] when the retry budget is
    /// exhausted, or [`ConnectionError::Cancelled`].
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.borrow_session(cancel).await.map(|_| ())
    }

    /// Runs `call` against the live session.
    ///
    /// Mutating classes are refused in read-only mode before any session is
    /// touched. A connection-class failure degrades the session; `Read`
    /// calls are replayed once on a fresh session, other classes surface
    /// [`ConnectionError::Interrupted`] and are never replayed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] for read-only refusals, unavailable
    /// backends, backend operation errors, and cancellation.
    pub async fn with_connection<T, F, Fut>(
        &self,
        class: OperationClass,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnMut(Arc<dyn BackendSession>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if self.shared.settings.readonly && class.is_mutating() {
            return Err(ConnectionError::ReadOnly { class: class.as_str() });
        }
        let mut replayed = false;
        loop {
            let borrowed = self.borrow_session(cancel).await?;
            match self.invoke(borrowed.session, cancel, &mut call).await? {
                Ok(value) => return Ok(value),
                Err(err) if err.is_connection_error() => {
                    self.mark_degraded(borrowed.generation, &err).await;
                    if class != OperationClass::Read {
                        return Err(ConnectionError::Interrupted {
                            class: class.as_str(),
                            reason: err.message().to_string(),
                        });
                    }
                    if !replayed {
                        replayed = true;
                        debug!(generation = borrowed.generation, "replaying read operation after connection loss");
                        continue;
                    }
                    return Err(ConnectionError::Unavailable {
                        reason: err.message().to_string(),
                    });
                }
                Err(err) => return Err(ConnectionError::Backend(err)),
            }
        }
    }

    /// Closes the session and returns to `Disconnected`.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.take() {
            session.close().await;
            info!(generation = slot.generation, "backend session closed");
        }
        slot.degraded = false;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Returns a healthy session, connecting if needed.
    ///
    /// The connect cycle runs on its own task with the slot lock, so a
    /// cancelled caller stops waiting without ending the cycle that queued
    /// callers depend on.
    async fn borrow_session(&self, cancel: &CancellationToken) -> Result<Borrowed, ConnectionError> {
        let observed_cycle = self.shared.cycles.load(Ordering::Acquire);
        let mut slot = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            slot = Arc::clone(&self.slot).lock_owned() => slot,
        };
        if let Some(session) = &slot.session
            && !slot.degraded
        {
            return Ok(Borrowed {
                session: Arc::clone(session),
                generation: slot.generation,
            });
        }
        if let Some(failure) = &slot.last_failure
            && failure.cycle > observed_cycle
        {
            return Err(ConnectionError::Unavailable {
                reason: failure.reason.clone(),
            });
        }

        self.shared.set_state(ConnectionState::Connecting);
        let shared = Arc::clone(&self.shared);
        let cycle = tokio::spawn(async move { shared.run_cycle(&mut slot).await });
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            joined = cycle => match joined {
                Ok(Ok(borrowed)) => Ok(borrowed),
                Ok(Err(reason)) => Err(ConnectionError::Unavailable { reason }),
                Err(err) => Err(ConnectionError::Unavailable {
                    reason: format!("connect cycle aborted: {err}"),
                }),
            },
        }
    }

    /// Runs one call with the call lock, timeout, and cancellation applied.
    async fn invoke<T, F, Fut>(
        &self,
        session: Arc<dyn BackendSession>,
        cancel: &CancellationToken,
        call: &mut F,
    ) -> Result<Result<T, BackendError>, ConnectionError>
    where
        F: FnMut(Arc<dyn BackendSession>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let guarded = async {
            let settings = &self.shared.settings;
            let _serialized = if settings.serialize_calls { Some(self.call_lock.lock().await) } else { None };
            match tokio::time::timeout(settings.call_timeout, call(session)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::connection(format!(
                    "backend call timed out after {} ms",
                    settings.call_timeout.as_millis()
                ))),
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = guarded => Ok(result),
        }
    }

    /// Marks the session degraded if `generation` is still current.
    async fn mark_degraded(&self, generation: u64, err: &BackendError) {
        let mut slot = self.slot.lock().await;
        if slot.generation == generation && slot.session.is_some() && !slot.degraded {
            slot.degraded = true;
            self.shared.set_state(ConnectionState::Degraded);
            warn!(generation, error = %err.message(), "backend session degraded");
        }
    }
}

impl Shared {
    /// Runs one connect cycle with backoff while holding the slot lock.
    async fn run_cycle(&self, slot: &mut Slot) -> Result<Borrowed, String> {
        if let Some(stale) = slot.session.take() {
            stale.close().await;
        }
        let target = ConnectTarget {
            uri: self.settings.uri.clone(),
            readonly: self.settings.readonly,
            call_timeout: self.settings.call_timeout,
        };
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            let result = tokio::time::timeout(self.settings.connect_timeout, self.connector.connect(&target)).await;
            match result {
                Ok(Ok(session)) => {
                    slot.generation += 1;
                    slot.session = Some(Arc::clone(&session));
                    slot.degraded = false;
                    slot.last_failure = None;
                    self.generation.store(slot.generation, Ordering::Release);
                    self.cycles.fetch_add(1, Ordering::AcqRel);
                    self.set_state(ConnectionState::Connected);
                    info!(uri = %target.uri, generation = slot.generation, attempt, "backend connected");
                    return Ok(Borrowed {
                        session,
                        generation: slot.generation,
                    });
                }
                Ok(Err(err)) => last_error = err.message().to_string(),
                Err(_) => {
                    last_error = format!("connect timed out after {} ms", self.settings.connect_timeout.as_millis());
                }
            }
            warn!(uri = %target.uri, attempt, max_attempts, error = %last_error, "backend connect attempt failed");
            if attempt < max_attempts {
                tokio::time::sleep(self.settings.retry.backoff(attempt)).await;
            }
        }
        let reason = format!("{max_attempts} connect attempts failed: {last_error}");
        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        slot.last_failure = Some(FailedCycle {
            cycle,
            reason: reason.clone(),
        });
        self.set_state(if slot.degraded { ConnectionState::Degraded } else { ConnectionState::Disconnected });
        Err(reason)
    }

    /// Publishes a state transition.
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}
