// crates/virt-gate-config/src/env.rs
// ============================================================================
// Module: Environment Overlay
// Description: Environment variable overrides for loaded configuration.
// Purpose: Let deployments adjust connection and transport settings without
//          editing the config file.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Environment variables win over file values. Every override is parsed
//! strictly; a malformed value fails the load rather than being ignored.
//! The lookup is injected so tests never touch the process environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::config::ConfigError;
use crate::config::LogLevel;
use crate::config::ServerTransport;
use crate::config::VirtGateConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variables recognised by the overlay.
pub const ENV_OVERRIDES: &[&str] = &[
    "LIBVIRT_URI",
    "LIBVIRT_TIMEOUT",
    "LIBVIRT_READONLY",
    "MCP_SERVER_NAME",
    "MCP_TRANSPORT",
    "MCP_HOST",
    "MCP_PORT",
    "MCP_AUDIT_LOG",
    "MCP_LOG_LEVEL",
    "MCP_LOG_FILE",
];

/// Host used when a network transport is selected without an address.
const DEFAULT_HOST: &str = "127.0.0.1";
/// Port used when a network transport is selected without an address.
const DEFAULT_PORT: u16 = 8000;

// ============================================================================
// SECTION: Overlay
// ============================================================================

/// Applies environment overrides to `config`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when an override value is malformed.
pub fn apply_env_overrides<F>(config: &mut VirtGateConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

    if let Some(uri) = read("LIBVIRT_URI") {
        config.backend.uri = uri;
    }
    if let Some(timeout) = read("LIBVIRT_TIMEOUT") {
        config.backend.connect_timeout_secs =
            timeout.parse().map_err(|_| invalid("LIBVIRT_TIMEOUT", "expected whole seconds"))?;
    }
    if let Some(readonly) = read("LIBVIRT_READONLY") {
        config.backend.readonly = parse_bool(&readonly).ok_or_else(|| invalid("LIBVIRT_READONLY", "expected a boolean"))?;
    }
    if let Some(name) = read("MCP_SERVER_NAME") {
        config.server.name = name;
    }
    if let Some(transport) = read("MCP_TRANSPORT") {
        config.server.transport = parse_transport(&transport)
            .ok_or_else(|| invalid("MCP_TRANSPORT", "expected stdio, http, or sse"))?;
    }
    apply_bind_overrides(config, read("MCP_HOST"), read("MCP_PORT"))?;
    if let Some(path) = read("MCP_AUDIT_LOG") {
        config.audit.path = Some(path);
    }
    if let Some(level) = read("MCP_LOG_LEVEL") {
        config.logging.level = LogLevel::parse(&level).ok_or_else(|| invalid("MCP_LOG_LEVEL", "unknown level"))?;
    }
    if let Some(file) = read("MCP_LOG_FILE") {
        config.logging.file = Some(file);
    }
    Ok(())
}

/// Composes the bind address from host and port overrides.
fn apply_bind_overrides(
    config: &mut VirtGateConfig,
    host: Option<String>,
    port: Option<String>,
) -> Result<(), ConfigError> {
    let network = !matches!(config.server.transport, ServerTransport::Stdio);
    if host.is_none() && port.is_none() && (!network || config.server.bind.is_some()) {
        return Ok(());
    }
    let (current_host, current_port) = split_bind(config.server.bind.as_deref());
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("MCP_PORT", "expected a port number"))?,
        None => current_port.unwrap_or(DEFAULT_PORT),
    };
    let host = host.or(current_host).unwrap_or_else(|| DEFAULT_HOST.to_string());
    config.server.bind = Some(if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    });
    Ok(())
}

/// Splits an existing bind string into host and port.
fn split_bind(bind: Option<&str>) -> (Option<String>, Option<u16>) {
    let Some(bind) = bind.map(str::trim).filter(|bind| !bind.is_empty()) else {
        return (None, None);
    };
    match bind.rsplit_once(':') {
        Some((host, port)) => (Some(host.to_string()), port.parse().ok()),
        None => (Some(bind.to_string()), None),
    }
}

/// Parses a transport name.
fn parse_transport(value: &str) -> Option<ServerTransport> {
    match value.to_ascii_lowercase().as_str() {
        "stdio" => Some(ServerTransport::Stdio),
        "http" => Some(ServerTransport::Http),
        "sse" => Some(ServerTransport::Sse),
        _ => None,
    }
}

/// Parses a boolean flag.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builds an override error.
fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid(format!("{key}: {reason}"))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
