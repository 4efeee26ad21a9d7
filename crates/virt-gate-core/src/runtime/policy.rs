// crates/virt-gate-core/src/runtime/policy.rs
// ============================================================================
// Module: Virt Gate Permission Registry
// Description: Allow-list policy snapshots and operation matching.
// Purpose: Decide whether a named operation is currently authorized.
// Dependencies: serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`PermissionPolicy`] is compiled into an immutable [`PolicySnapshot`].
//! The [`PermissionRegistry`] holds the current snapshot behind an `Arc` and
//! swaps it atomically on reload; readers clone the `Arc` and evaluate
//! entirely against the snapshot they hold.
//!
//! Matching is fail-closed: an operation is allowed only by an exact
//! allow-list entry or by a `<prefix>.*` wildcard whose prefix is followed by
//! a dot in the name. Operations listed as exact-only ignore wildcards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::core::identifiers::is_dotted_identifier;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default concurrent operation bound.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 10;

/// Operations allowed when no allow-list is configured.
pub const DEFAULT_ALLOWED_OPERATIONS: &[&str] = &[
    "domain.list",
    "domain.info",
    "domain.start",
    "domain.stop",
    "domain.reboot",
    "domain.stats",
    "host.info",
    "network.list",
    "storage.list",
];

/// Wildcard suffix accepted in allow-list patterns.
const WILDCARD_SUFFIX: &str = ".*";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Permission policy as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    /// Allowed operation names and `<prefix>.*` wildcards.
    pub allowed_operations: Vec<String>,
    /// Operations that only an exact allow-list entry can grant.
    pub exact_only_operations: Vec<String>,
    /// Whether operation attempts are audited.
    pub audit_enabled: bool,
    /// Maximum concurrent in-flight operations.
    pub max_concurrent_operations: usize,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            allowed_operations: DEFAULT_ALLOWED_OPERATIONS.iter().map(ToString::to_string).collect(),
            exact_only_operations: Vec::new(),
            audit_enabled: true,
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
        }
    }
}

/// Policy compilation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Allow-list or exact-only entry is not valid pattern syntax.
    #[error("invalid operation pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Failure description.
        reason: &'static str,
    },
    /// Concurrency bound is zero.
    #[error("max_concurrent_operations must be at least 1")]
    InvalidLimit,
}

// ============================================================================
// SECTION: Matcher
// ============================================================================

/// Deterministic matcher over exact names and wildcard prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMatcher {
    /// Exact operation names.
    exact: BTreeSet<String>,
    /// Wildcard prefixes, stored with their trailing dot.
    prefixes: BTreeSet<String>,
}

impl OperationMatcher {
    /// Compiles allow-list patterns.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPattern`] for bare or embedded wildcards
    /// and for names that are not dotted identifiers.
    pub fn compile<I, S>(patterns: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if let Some(prefix) = pattern.strip_suffix(WILDCARD_SUFFIX) {
                if !is_dotted_identifier(prefix) {
                    return Err(invalid_pattern(pattern, "wildcard prefix must be a dotted identifier"));
                }
                matcher.prefixes.insert(format!("{prefix}."));
            } else if pattern.contains('*') {
                return Err(invalid_pattern(pattern, "wildcards are only allowed as a trailing `.*`"));
            } else if is_dotted_identifier(pattern) {
                matcher.exact.insert(pattern.to_string());
            } else {
                return Err(invalid_pattern(pattern, "expected a dotted identifier"));
            }
        }
        Ok(matcher)
    }

    /// Returns true when the name matches an exact entry or a wildcard.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.matches_exact(name) || self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Returns true when the name matches an exact entry.
    #[must_use]
    pub fn matches_exact(&self, name: &str) -> bool {
        self.exact.contains(name)
    }

    /// Returns true when no pattern was compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

/// Builds an invalid-pattern error.
fn invalid_pattern(pattern: &str, reason: &'static str) -> PolicyError {
    PolicyError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    }
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Immutable compiled policy.
#[derive(Debug)]
pub struct PolicySnapshot {
    /// Monotonic snapshot generation.
    generation: u64,
    /// Source policy.
    policy: PermissionPolicy,
    /// Compiled allow-list.
    allowed: OperationMatcher,
    /// Names that ignore wildcard matches.
    exact_only: BTreeSet<String>,
}

impl PolicySnapshot {
    /// Compiles a policy into a snapshot with the given generation.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for invalid patterns or a zero limit.
    pub fn compile(policy: PermissionPolicy, generation: u64) -> Result<Self, PolicyError> {
        if policy.max_concurrent_operations == 0 {
            return Err(PolicyError::InvalidLimit);
        }
        let allowed = OperationMatcher::compile(&policy.allowed_operations)?;
        let mut exact_only = BTreeSet::new();
        for name in &policy.exact_only_operations {
            if !is_dotted_identifier(name) {
                return Err(invalid_pattern(name, "exact-only entries must be operation names"));
            }
            exact_only.insert(name.clone());
        }
        Ok(Self {
            generation,
            policy,
            allowed,
            exact_only,
        })
    }

    /// Returns true when the operation is authorized by this snapshot.
    #[must_use]
    pub fn is_allowed(&self, operation: &str) -> bool {
        if self.exact_only.contains(operation) {
            self.allowed.matches_exact(operation)
        } else {
            self.allowed.matches(operation)
        }
    }

    /// Returns the snapshot generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns whether auditing is enabled.
    #[must_use]
    pub const fn audit_enabled(&self) -> bool {
        self.policy.audit_enabled
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub const fn max_concurrent_operations(&self) -> usize {
        self.policy.max_concurrent_operations
    }

    /// Returns the source policy.
    #[must_use]
    pub const fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Holder of the current policy snapshot.
#[derive(Debug)]
pub struct PermissionRegistry {
    /// Current snapshot; the lock is held only to clone or swap the `Arc`.
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PermissionRegistry {
    /// Creates a registry at generation 1.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the policy does not compile.
    pub fn new(policy: PermissionPolicy) -> Result<Self, PolicyError> {
        let snapshot = PolicySnapshot::compile(policy, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Evaluates an operation against the current snapshot.
    #[must_use]
    pub fn is_allowed(&self, operation: &str) -> bool {
        self.snapshot().is_allowed(operation)
    }

    /// Compiles and installs a new policy.
    ///
    /// The previous snapshot stays installed when compilation fails.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the policy does not compile.
    pub fn reload(&self, policy: PermissionPolicy) -> Result<Arc<PolicySnapshot>, PolicyError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(PolicySnapshot::compile(policy, current.generation + 1)?);
        *current = Arc::clone(&snapshot);
        drop(current);
        info!(
            generation = snapshot.generation(),
            allowed = snapshot.policy().allowed_operations.len(),
            "permission policy reloaded"
        );
        Ok(snapshot)
    }
}
