// crates/virt-gate-core/src/runtime/limiter.rs
// ============================================================================
// Module: Virt Gate Concurrency Limiter
// Description: Bounded admission for in-flight privileged operations.
// Purpose: Cap concurrent backend work with leases released on every path.
// Dependencies: thiserror, tokio
// ============================================================================

//! ## Overview
//! The limiter admits at most `limit` concurrent leases. [`Lease`] releases
//! its slot exactly once, either explicitly or on drop, so errors, panics,
//! and cancelled futures never leak capacity.
//!
//! Lowering the bound never revokes held leases; admission simply pauses
//! until in-flight work drops below the new bound. Waiters park on a
//! [`Notify`] and re-check admission after every wake-up.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::pin::pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::time::duration_millis;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default time a caller waits for a lease.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Admission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// All slots are held and the caller asked not to wait.
    #[error("concurrency limit of {limit} operations reached")]
    LimitExceeded {
        /// Bound in force when admission failed.
        limit: usize,
    },
    /// No slot became free before the deadline.
    #[error("timed out after {waited_ms} ms waiting for an operation slot")]
    Timeout {
        /// Time spent waiting in milliseconds.
        waited_ms: u64,
    },
}

// ============================================================================
// SECTION: Limiter
// ============================================================================

/// Counting limiter for in-flight operations.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    /// Shared limiter state.
    inner: Arc<LimiterInner>,
}

/// Shared state behind the limiter and its leases.
#[derive(Debug)]
struct LimiterInner {
    /// Bound and in-flight count.
    counts: Mutex<Counts>,
    /// Wakes parked waiters.
    notify: Notify,
}

/// Mutable admission counters.
#[derive(Debug, Clone, Copy)]
struct Counts {
    /// Current bound.
    limit: usize,
    /// Leases currently held.
    in_flight: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter; a zero bound is raised to one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                counts: Mutex::new(Counts {
                    limit: limit.max(1),
                    in_flight: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Acquires a lease without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::LimitExceeded`] when every slot is held.
    pub fn try_acquire(&self) -> Result<Lease, LimiterError> {
        self.try_lease().ok_or_else(|| LimiterError::LimitExceeded { limit: self.limit() })
    }

    /// Acquires a lease, waiting at most `timeout`.
    ///
    /// A zero timeout behaves like [`Self::try_acquire`].
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Timeout`] when no slot frees up in time, or
    /// [`LimiterError::LimitExceeded`] for a zero timeout.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, LimiterError> {
        if timeout.is_zero() {
            return self.try_acquire();
        }
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if let Some(lease) = self.try_lease() {
                return Ok(lease);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(LimiterError::Timeout {
                    waited_ms: duration_millis(started.elapsed()),
                });
            }
        }
    }

    /// Changes the bound; held leases stay valid.
    ///
    /// A zero bound is raised to one. Raising the bound wakes waiters.
    pub fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let raised = {
            let mut counts = self.inner.counts.lock().unwrap_or_else(PoisonError::into_inner);
            let raised = limit > counts.limit;
            counts.limit = limit;
            raised
        };
        if raised {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns the current bound.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.counts().limit
    }

    /// Returns the number of leases currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.counts().in_flight
    }

    /// Takes a slot if one is free.
    fn try_lease(&self) -> Option<Lease> {
        let spare = {
            let mut counts = self.inner.counts.lock().unwrap_or_else(PoisonError::into_inner);
            if counts.in_flight >= counts.limit {
                return None;
            }
            counts.in_flight += 1;
            counts.in_flight < counts.limit
        };
        if spare {
            // Pass the wake-up along so a burst of releases is not absorbed by one waiter.
            self.inner.notify.notify_one();
        }
        Some(Lease {
            inner: Arc::clone(&self.inner),
            released: AtomicBool::new(false),
        })
    }
}

impl LimiterInner {
    /// Returns a copy of the counters.
    fn counts(&self) -> Counts {
        *self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns one slot and wakes the next waiter.
    fn release_slot(&self) {
        {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            counts.in_flight = counts.in_flight.saturating_sub(1);
        }
        self.notify.notify_one();
    }
}

// ============================================================================
// SECTION: Lease
// ============================================================================

/// Held admission slot; released once, explicitly or on drop.
#[derive(Debug)]
pub struct Lease {
    /// Limiter the slot belongs to.
    inner: Arc<LimiterInner>,
    /// Set on first release.
    released: AtomicBool,
}

impl Lease {
    /// Releases the slot; later calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.inner.release_slot();
        }
    }

    /// Returns true once the slot has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}
