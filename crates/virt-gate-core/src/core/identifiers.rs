// crates/virt-gate-core/src/core/identifiers.rs
// ============================================================================
// Module: Virt Gate Identifiers
// Description: Operation names and caller context identifiers.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Operation names are dotted lowercase identifiers such as `domain.start`.
//! The wrappers are opaque; syntax is checked by [`is_dotted_identifier`]
//! at the validation and policy boundaries rather than on construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Dotted operation name, for example `domain.list`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationName(String);

impl OperationName {
    /// Creates a new operation name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the name is a well-formed dotted identifier.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        is_dotted_identifier(&self.0)
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for OperationName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OperationName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Opaque caller context (transport session or request identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerContext(String);

impl CallerContext {
    /// Creates a new caller context.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the context as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CallerContext {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallerContext {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Syntax
// ============================================================================

/// Maximum length of an operation name or pattern in bytes.
pub const MAX_OPERATION_NAME_LENGTH: usize = 128;

/// Returns true for one or more `[a-z0-9_]+` segments separated by `.`.
#[must_use]
pub fn is_dotted_identifier(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_OPERATION_NAME_LENGTH {
        return false;
    }
    value.split('.').all(|segment| {
        !segment.is_empty()
            && segment.bytes().all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_')
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::MAX_OPERATION_NAME_LENGTH;
    use super::is_dotted_identifier;

    #[test]
    fn dotted_identifier_accepts_catalog_style_names() {
        assert!(is_dotted_identifier("domain.attach_device"));
        assert!(is_dotted_identifier("host.info"));
        assert!(is_dotted_identifier("status"));
    }

    #[test]
    fn dotted_identifier_rejects_malformed_names() {
        for name in ["", ".", "domain.", ".list", "domain..list", "Domain.list", "domain.*", "domain list"] {
            assert!(!is_dotted_identifier(name), "{name} should be rejected");
        }
        assert!(!is_dotted_identifier(&"a".repeat(MAX_OPERATION_NAME_LENGTH + 1)));
    }
}
