// crates/virt-gate-core/src/core/validation.rs
// ============================================================================
// Module: Virt Gate Request Validation
// Description: Schema validation for operation requests.
// Purpose: Reject malformed or unsafe input before authorization.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Validation resolves the operation against the catalog, checks each
//! parameter against its declared kind, rejects unknown keys, and applies
//! defaults. Resource names and XML payloads go through dedicated safety
//! checks: names may not carry path traversal or control characters, and XML
//! may not declare document types or entities.
//!
//! Security posture: all request parameters are untrusted; validation fails
//! closed and never forwards a parameter the catalog does not declare.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::core::catalog::OperationSpec;
use crate::core::catalog::ParamKind;
use crate::core::catalog::ParamSpec;
use crate::core::catalog::lookup;
use crate::core::identifiers::OperationName;
use crate::core::request::OperationParams;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum domain name length in bytes.
pub const MAX_DOMAIN_NAME_LENGTH: usize = 255;

/// Maximum XML document size in bytes.
pub const MAX_XML_BYTES: usize = 1024 * 1024;

/// Substrings rejected in domain names (compared case-insensitively).
const FORBIDDEN_NAME_SEQUENCES: &[&str] = &["../", "..\\", "/etc/", "/proc/", "/sys/", "\\windows\\"];

/// Declarations rejected in XML payloads (compared case-insensitively).
const FORBIDDEN_XML_DECLARATIONS: &[&str] = &["<!DOCTYPE", "<!ENTITY"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Request validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Operation name is not a dotted identifier.
    #[error("malformed operation name: `{0}`")]
    MalformedName(String),
    /// Operation name is not in the catalog.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// Parameter is not declared by the operation.
    #[error("unknown parameter `{parameter}` for {operation}")]
    UnknownParameter {
        /// Operation name.
        operation: String,
        /// Offending parameter name.
        parameter: String,
    },
    /// Required parameter was not supplied.
    #[error("missing required parameter `{parameter}` for {operation}")]
    MissingParameter {
        /// Operation name.
        operation: String,
        /// Missing parameter name.
        parameter: String,
    },
    /// Parameter value failed its kind check.
    #[error("invalid parameter `{parameter}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        parameter: String,
        /// Failure description.
        reason: String,
    },
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a request and returns the catalog entry with normalized params.
///
/// Explicit `null` values are treated as omitted. Defaults are filled in for
/// every omitted optional parameter.
///
/// # Errors
///
/// Returns [`ValidationError`] when the operation is unknown, a parameter is
/// undeclared or missing, or a value fails its kind check.
pub fn validate_request(
    operation: &OperationName,
    params: &OperationParams,
) -> Result<(&'static OperationSpec, OperationParams), ValidationError> {
    if !operation.is_well_formed() {
        return Err(ValidationError::MalformedName(operation.as_str().to_string()));
    }
    let spec = lookup(operation.as_str())
        .ok_or_else(|| ValidationError::UnknownOperation(operation.as_str().to_string()))?;

    if let Some(unknown) = params.keys().find(|key| spec.param(key).is_none()) {
        return Err(ValidationError::UnknownParameter {
            operation: spec.name.to_string(),
            parameter: unknown.clone(),
        });
    }

    let mut normalized = OperationParams::new();
    for param in spec.params {
        match params.get(param.name).filter(|value| !value.is_null()) {
            Some(value) => {
                check_value(param, value)?;
                normalized.insert(param.name.to_string(), value.clone());
            }
            None => {
                let default = param.default_value().ok_or_else(|| ValidationError::MissingParameter {
                    operation: spec.name.to_string(),
                    parameter: param.name.to_string(),
                })?;
                normalized.insert(param.name.to_string(), default);
            }
        }
    }
    Ok((spec, normalized))
}

/// Checks a domain name for length, control characters, and path traversal.
///
/// # Errors
///
/// Returns a description of the first rule the name violates.
pub fn validate_domain_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("domain name must not be empty".to_string());
    }
    if name.len() > MAX_DOMAIN_NAME_LENGTH {
        return Err(format!("domain name exceeds {MAX_DOMAIN_NAME_LENGTH} bytes"));
    }
    if name.chars().any(char::is_control) {
        return Err("domain name contains control characters".to_string());
    }
    let lowered = name.to_ascii_lowercase();
    if let Some(sequence) = FORBIDDEN_NAME_SEQUENCES.iter().find(|sequence| lowered.contains(*sequence)) {
        return Err(format!("domain name contains forbidden sequence `{sequence}`"));
    }
    Ok(())
}

/// Checks an XML payload for size, shape, and external entity declarations.
///
/// # Errors
///
/// Returns a description of the first rule the document violates.
pub fn validate_xml_document(xml: &str) -> Result<(), String> {
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err("XML document must not be empty".to_string());
    }
    if xml.len() > MAX_XML_BYTES {
        return Err(format!("XML document exceeds {MAX_XML_BYTES} bytes"));
    }
    if !trimmed.starts_with('<') {
        return Err("XML document must start with an element".to_string());
    }
    let upper = trimmed.to_ascii_uppercase();
    if let Some(declaration) = FORBIDDEN_XML_DECLARATIONS.iter().find(|decl| upper.contains(*decl)) {
        return Err(format!("XML document must not contain `{declaration}` declarations"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Checks a present value against the parameter kind.
fn check_value(param: &ParamSpec, value: &Value) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidParameter {
        parameter: param.name.to_string(),
        reason,
    };
    match param.kind {
        ParamKind::DomainName => {
            let name = value.as_str().ok_or_else(|| invalid("expected a string".to_string()))?;
            validate_domain_name(name).map_err(invalid)
        }
        ParamKind::Xml => {
            let xml = value.as_str().ok_or_else(|| invalid("expected a string".to_string()))?;
            validate_xml_document(xml).map_err(invalid)
        }
        ParamKind::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(invalid("expected a boolean".to_string()))
            }
        }
        ParamKind::Choice(options) => {
            let choice = value.as_str().ok_or_else(|| invalid("expected a string".to_string()))?;
            if options.contains(&choice) {
                Ok(())
            } else {
                Err(invalid(format!("expected one of {}", options.join(", "))))
            }
        }
        ParamKind::ChoiceList(options) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array".to_string()))?;
            if items.is_empty() {
                return Err(invalid("expected at least one entry".to_string()));
            }
            let mut seen = BTreeSet::new();
            for item in items {
                let entry = item.as_str().ok_or_else(|| invalid("expected an array of strings".to_string()))?;
                if !options.contains(&entry) {
                    return Err(invalid(format!("unsupported entry `{entry}`")));
                }
                if !seen.insert(entry) {
                    return Err(invalid(format!("duplicate entry `{entry}`")));
                }
            }
            Ok(())
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
