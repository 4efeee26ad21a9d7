// crates/virt-gate-config/src/lib.rs
// ============================================================================
// Module: Virt Gate Config Library
// Description: Canonical config model, environment overlay, and validation.
// Purpose: Single source of truth for virt-gate.toml semantics.
// Dependencies: virt-gate-core, serde, toml
// ============================================================================

//! ## Overview
//! `virt-gate-config` defines the configuration model for the Virt Gate
//! server. Files are TOML; a fixed set of environment variables overlays the
//! file before validation. Validation is fail-closed and converts the result
//! into the policy and connection settings the core runtime consumes.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod env;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use env::ENV_OVERRIDES;
