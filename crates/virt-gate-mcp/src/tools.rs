// crates/virt-gate-mcp/src/tools.rs
// ============================================================================
// Module: MCP Tool Router
// Description: Tool routing from MCP tool names to gated operations.
// Purpose: Expose thin wrappers over the Virt Gate operation gateway.
// Dependencies: virt-gate-core, serde_json, tokio-util
// ============================================================================

//! ## Overview
//! Every MCP tool except `gateway_status` is a thin wrapper over one catalog
//! operation executed through [`virt_gate_core::OperationGateway`]. Tool input
//! schemas are generated from the catalog parameter specs, so the advertised
//! schema and the gateway's validation cannot drift apart.
//!
//! Security posture: tool arguments are untrusted and reach the backend only
//! through the gateway pipeline.
//!
//! ## Invariants
//! - Each catalog operation is reachable through exactly one tool.
//! - `gateway_status` never touches the backend and is not audited.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use virt_gate_core::CallerContext;
use virt_gate_core::GatewayError;
use virt_gate_core::OperationGateway;
use virt_gate_core::OperationParams;
use virt_gate_core::OperationRequest;
use virt_gate_core::OperationSpec;
use virt_gate_core::ParamKind;
use virt_gate_core::catalog::lookup;
use virt_gate_core::core::validation::MAX_DOMAIN_NAME_LENGTH;
use virt_gate_core::core::validation::MAX_XML_BYTES;

// ============================================================================
// SECTION: Tool Bindings
// ============================================================================

/// Name of the local status tool.
pub const GATEWAY_STATUS_TOOL: &str = "gateway_status";

/// Mapping from an MCP tool name to a catalog operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolBinding {
    /// MCP tool name.
    pub tool: &'static str,
    /// Catalog operation name.
    pub operation: &'static str,
}

/// Tools backed by gateway operations, in advertised order.
pub const TOOL_BINDINGS: &[ToolBinding] = &[
    ToolBinding {
        tool: "list_domains",
        operation: "domain.list",
    },
    ToolBinding {
        tool: "domain_info",
        operation: "domain.info",
    },
    ToolBinding {
        tool: "start_domain",
        operation: "domain.start",
    },
    ToolBinding {
        tool: "stop_domain",
        operation: "domain.stop",
    },
    ToolBinding {
        tool: "reboot_domain",
        operation: "domain.reboot",
    },
    ToolBinding {
        tool: "domain_stats",
        operation: "domain.stats",
    },
    ToolBinding {
        tool: "get_domain_xml",
        operation: "domain.getxml",
    },
    ToolBinding {
        tool: "create_domain",
        operation: "domain.create",
    },
    ToolBinding {
        tool: "delete_domain",
        operation: "domain.delete",
    },
    ToolBinding {
        tool: "attach_device",
        operation: "domain.attach_device",
    },
    ToolBinding {
        tool: "detach_device",
        operation: "domain.detach_device",
    },
    ToolBinding {
        tool: "host_info",
        operation: "host.info",
    },
    ToolBinding {
        tool: "list_networks",
        operation: "network.list",
    },
    ToolBinding {
        tool: "list_storage_pools",
        operation: "storage.list",
    },
];

/// Returns the binding for a tool name.
#[must_use]
pub fn binding(tool: &str) -> Option<&'static ToolBinding> {
    TOOL_BINDINGS.iter().find(|binding| binding.tool == tool)
}

// ============================================================================
// SECTION: Tool Definitions
// ============================================================================

/// Tool metadata advertised through `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for tool arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Builds the definition list: operation tools followed by `gateway_status`.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let mut tools: Vec<ToolDefinition> = TOOL_BINDINGS
        .iter()
        .filter_map(|binding| {
            lookup(binding.operation).map(|spec| ToolDefinition {
                name: binding.tool.to_string(),
                description: format!("{} [{}]", spec.description, spec.class.as_str()),
                input_schema: input_schema(spec),
            })
        })
        .collect();
    tools.push(ToolDefinition {
        name: GATEWAY_STATUS_TOOL.to_string(),
        description: "Report gateway connection and policy status".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false,
        }),
    });
    tools
}

/// Generates the JSON Schema for an operation's parameters.
#[must_use]
pub fn input_schema(spec: &OperationSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in spec.params {
        let mut schema = kind_schema(param.kind);
        if let Value::Object(fields) = &mut schema {
            fields.insert("description".to_string(), Value::String(param.description.to_string()));
            if let Some(default) = param.default_value() {
                fields.insert("default".to_string(), default);
            }
        }
        if param.is_required() {
            required.push(Value::String(param.name.to_string()));
        }
        properties.insert(param.name.to_string(), schema);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Returns the schema fragment for a parameter kind.
fn kind_schema(kind: ParamKind) -> Value {
    match kind {
        ParamKind::DomainName => json!({
            "type": "string",
            "minLength": 1,
            "maxLength": MAX_DOMAIN_NAME_LENGTH,
        }),
        ParamKind::Xml => json!({
            "type": "string",
            "minLength": 1,
            "maxLength": MAX_XML_BYTES,
        }),
        ParamKind::Boolean => json!({ "type": "boolean" }),
        ParamKind::Choice(options) => json!({
            "type": "string",
            "enum": options,
        }),
        ParamKind::ChoiceList(options) => json!({
            "type": "array",
            "items": { "type": "string", "enum": options },
            "uniqueItems": true,
        }),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool call failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// No tool with the requested name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Tool arguments were not a JSON object.
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    /// Gateway rejected or failed the operation.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Tool output could not be encoded.
    #[error("serialization failed")]
    Serialization,
}

impl ToolError {
    /// Returns the stable kind tag reported to clients.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "validation_error",
            Self::Gateway(err) => err.kind(),
            Self::Serialization => "serialization_error",
        }
    }

    /// Returns true when the client may retry with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(err) => err.is_retryable(),
            Self::UnknownTool(_) | Self::InvalidArguments(_) | Self::Serialization => false,
        }
    }
}

// ============================================================================
// SECTION: Tool Router
// ============================================================================

/// Tool router for MCP requests.
#[derive(Clone)]
pub struct ToolRouter {
    /// Gateway every operation tool goes through.
    gateway: Arc<OperationGateway>,
    /// Advertised tool definitions.
    tools: Arc<Vec<ToolDefinition>>,
}

impl ToolRouter {
    /// Creates a router over the gateway.
    #[must_use]
    pub fn new(gateway: Arc<OperationGateway>) -> Self {
        Self {
            gateway,
            tools: Arc::new(tool_definitions()),
        }
    }

    /// Returns the advertised tool definitions.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.as_ref().clone()
    }

    /// Returns the gateway behind the router.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<OperationGateway> {
        &self.gateway
    }

    /// Executes a tool call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for unknown tools, malformed arguments, or
    /// gateway failures.
    pub async fn handle_tool_call(
        &self,
        caller: CallerContext,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        if name == GATEWAY_STATUS_TOOL {
            return self.gateway_status();
        }
        let binding = binding(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let params = arguments_to_params(arguments)?;
        let request = OperationRequest::new(binding.operation, caller).with_params(params);
        let result = self.gateway.execute_with_cancel(request, cancel).await?;
        Ok(result.output)
    }

    /// Builds the local status payload.
    fn gateway_status(&self) -> Result<Value, ToolError> {
        let status = self.gateway.status();
        let policy = self.gateway.policy();
        let mut value = serde_json::to_value(status).map_err(|_| ToolError::Serialization)?;
        if let Value::Object(fields) = &mut value {
            fields.insert("allowed_operations".to_string(), json!(policy.policy().allowed_operations));
            fields.insert("exact_only_operations".to_string(), json!(policy.policy().exact_only_operations));
        }
        Ok(value)
    }
}

/// Converts tool arguments into operation parameters.
fn arguments_to_params(arguments: Value) -> Result<OperationParams, ToolError> {
    match arguments {
        Value::Null => Ok(OperationParams::new()),
        Value::Object(fields) => Ok(fields.into_iter().collect()),
        _ => Err(ToolError::InvalidArguments("arguments must be a JSON object".to_string())),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
