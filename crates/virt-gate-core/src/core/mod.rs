// crates/virt-gate-core/src/core/mod.rs
// ============================================================================
// Module: Virt Gate Core Types
// Description: Data model for operation requests, catalog, and audit events.
// Purpose: Group the value types shared by the runtime and the tool layer.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Core types are plain values: identifiers, requests and results, the static
//! operation catalog with its parameter schemas, request validation, and the
//! audit event model. None of them hold runtime state.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod catalog;
pub mod identifiers;
pub mod request;
pub mod time;
pub mod validation;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditOutcome;
pub use audit::AuditRecord;
pub use audit::OutcomeDetail;
pub use audit::redact_params;
pub use catalog::OperationClass;
pub use catalog::OperationSpec;
pub use catalog::ParamDefault;
pub use catalog::ParamKind;
pub use catalog::ParamSpec;
pub use identifiers::CallerContext;
pub use identifiers::OperationName;
pub use request::OperationParams;
pub use request::OperationRequest;
pub use request::OperationResult;
pub use time::duration_millis;
pub use time::unix_millis;
pub use validation::ValidationError;
pub use validation::validate_domain_name;
pub use validation::validate_request;
pub use validation::validate_xml_document;
