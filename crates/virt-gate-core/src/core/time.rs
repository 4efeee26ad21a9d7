// crates/virt-gate-core/src/core/time.rs
// ============================================================================
// Module: Virt Gate Time Helpers
// Description: Wall-clock and duration conversions used in events.
// Purpose: Keep timestamp encoding consistent across audit and results.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Timestamps are milliseconds since the Unix epoch. Durations are reported
//! as whole milliseconds, saturating at `u64::MAX`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before the epoch reports zero.
#[must_use]
pub fn unix_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_millis())
}

/// Converts a duration into whole milliseconds, saturating on overflow.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
