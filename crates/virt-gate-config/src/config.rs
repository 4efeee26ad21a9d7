// crates/virt-gate-config/src/config.rs
// ============================================================================
// Module: Virt Gate Configuration
// Description: Configuration loading and validation for the Virt Gate server.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: virt-gate-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! overlaid with environment variables, and validated as a whole. A missing
//! file at the default location yields the defaults; an explicitly named
//! file must exist.
//!
//! Security posture: config inputs are untrusted; every allow-list pattern is
//! compiled during validation so a malformed entry can never widen access.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use virt_gate_core::ConnectionSettings;
use virt_gate_core::GatewayConfig;
use virt_gate_core::OperationClass;
use virt_gate_core::PermissionPolicy;
use virt_gate_core::PolicySnapshot;
use virt_gate_core::RetryPolicy;
use virt_gate_core::catalog;
use virt_gate_core::runtime::connection::DEFAULT_BACKEND_URI;
use virt_gate_core::runtime::policy::DEFAULT_ALLOWED_OPERATIONS;
use virt_gate_core::runtime::policy::DEFAULT_MAX_CONCURRENT_OPERATIONS;

use crate::env::apply_env_overrides;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "virt-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "VIRT_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of the backend URI.
const MAX_URI_LENGTH: usize = 4096;
/// Maximum length of the advertised server name.
const MAX_SERVER_NAME_LENGTH: usize = 128;
/// Maximum number of allow-list entries.
const MAX_POLICY_ENTRIES: usize = 256;
/// Connect timeout bounds in seconds.
const CONNECT_TIMEOUT_RANGE: (u64, u64) = (1, 300);
/// Call timeout bounds in seconds.
const CALL_TIMEOUT_RANGE: (u64, u64) = (1, 3600);
/// Connect attempt bounds per reconnect cycle.
const MAX_ATTEMPTS_RANGE: (u32, u32) = (1, 10);
/// Maximum backoff delay in milliseconds.
const MAX_BACKOFF_MS: u64 = 300_000;
/// Concurrency bounds.
const MAX_CONCURRENT_RANGE: (usize, usize) = (1, 100);
/// Maximum limiter acquisition timeout in milliseconds.
const MAX_ACQUIRE_TIMEOUT_MS: u64 = 300_000;
/// Operations every deployment must allow.
const REQUIRED_OPERATIONS: &[&str] = &["domain.list", "domain.info"];

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for the Virt Gate server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtGateConfig {
    /// Backend connection configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Server transport configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Authorization and throttling configuration.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Path the configuration was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl VirtGateConfig {
    /// Loads configuration using the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overlay, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| env::var(key).ok())
    }

    /// Loads configuration with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overlay, or validation fails.
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (resolved, explicit) = resolve_path(path, &lookup)?;
        validate_path(&resolved)?;
        let mut config = match fs::read(&resolved) {
            Ok(bytes) => {
                let mut config = Self::from_bytes(&bytes)?;
                config.source_path = Some(resolved);
                config
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => Self::default(),
            Err(err) => return Err(ConfigError::Io(format!("{}: {err}", resolved.display()))),
        };
        apply_env_overrides(&mut config, &lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration bytes without validating.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for oversized, non-UTF-8, or malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        self.server.validate()?;
        self.security.validate()?;
        self.audit.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Returns the permission policy described by the security section.
    #[must_use]
    pub fn permission_policy(&self) -> PermissionPolicy {
        self.security.permission_policy()
    }

    /// Returns connection manager settings.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        self.backend.connection_settings()
    }

    /// Returns the default limiter wait; zero fails fast.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.security.acquire_timeout_ms)
    }

    /// Returns gateway tuning.
    #[must_use]
    pub const fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            default_acquire_timeout: self.acquire_timeout(),
        }
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

// ============================================================================
// SECTION: Backend Config
// ============================================================================

/// Supported backend drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendDriver {
    /// Drive the hypervisor through the `virsh` command-line client.
    #[default]
    Virsh,
    /// Built-in in-memory hypervisor for demos and tests.
    Memory,
}

/// Backend connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Backend driver.
    #[serde(default)]
    pub driver: BackendDriver,
    /// Hypervisor connection URI.
    #[serde(default = "default_backend_uri")]
    pub uri: String,
    /// Open the backend read-only and refuse mutating operations.
    #[serde(default)]
    pub readonly: bool,
    /// Per-attempt connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Serialize backend calls over the shared session.
    #[serde(default = "default_true")]
    pub serialize_calls: bool,
    /// Path to the `virsh` executable.
    #[serde(default = "default_virsh_path")]
    pub virsh_path: String,
    /// Reconnect backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: BackendDriver::default(),
            uri: default_backend_uri(),
            readonly: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            serialize_calls: true,
            virsh_path: default_virsh_path(),
            retry: RetryConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Validates backend configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let uri = self.uri.trim();
        if uri.is_empty() || uri.len() > MAX_URI_LENGTH {
            return Err(ConfigError::Invalid("backend.uri must be non-empty and bounded".to_string()));
        }
        check_range("backend.connect_timeout_secs", self.connect_timeout_secs, CONNECT_TIMEOUT_RANGE)?;
        check_range("backend.call_timeout_secs", self.call_timeout_secs, CALL_TIMEOUT_RANGE)?;
        if self.driver == BackendDriver::Virsh {
            validate_path_string("backend.virsh_path", &self.virsh_path)?;
        }
        self.retry.validate()
    }

    /// Returns connection manager settings.
    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            uri: self.uri.trim().to_string(),
            readonly: self.readonly,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
            serialize_calls: self.serialize_calls,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Connect attempts per reconnect cycle.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Validates retry bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("backend.retry.max_attempts", self.max_attempts, MAX_ATTEMPTS_RANGE)?;
        check_range("backend.retry.initial_backoff_ms", self.initial_backoff_ms, (1, MAX_BACKOFF_MS))?;
        check_range("backend.retry.max_backoff_ms", self.max_backoff_ms, (self.initial_backoff_ms, MAX_BACKOFF_MS))
    }
}

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Supported MCP transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Use stdin/stdout transport.
    #[default]
    Stdio,
    /// Use HTTP JSON-RPC transport.
    Http,
    /// Use SSE transport for responses.
    Sse,
}

/// Server transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name advertised during initialization.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Transport type for MCP.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for HTTP or SSE transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Permit binding to non-loopback addresses.
    #[serde(default)]
    pub allow_non_loopback: bool,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            transport: ServerTransport::Stdio,
            bind: None,
            allow_non_loopback: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let name = self.name.trim();
        if name.is_empty() || name.len() > MAX_SERVER_NAME_LENGTH {
            return Err(ConfigError::Invalid("server.name must be non-empty and bounded".to_string()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be greater than zero".to_string()));
        }
        match self.transport {
            ServerTransport::Http | ServerTransport::Sse => {
                let addr = self.bind_addr()?;
                if !addr.ip().is_loopback() && !self.allow_non_loopback {
                    return Err(ConfigError::Invalid(
                        "non-loopback bind requires server.allow_non_loopback".to_string(),
                    ));
                }
            }
            ServerTransport::Stdio => {}
        }
        Ok(())
    }

    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address is missing or malformed.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = self.bind.as_deref().unwrap_or_default().trim();
        if bind.is_empty() {
            return Err(ConfigError::Invalid("http/sse transport requires bind address".to_string()));
        }
        bind.parse().map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))
    }
}

// ============================================================================
// SECTION: Security Config
// ============================================================================

/// Authorization and throttling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Allowed operation names and `<prefix>.*` wildcards.
    #[serde(default = "default_allowed_operations")]
    pub allowed_operations: Vec<String>,
    /// Operations that only an exact allow-list entry can grant.
    #[serde(default)]
    pub exact_only_operations: Vec<String>,
    /// Treat every destructive catalog operation as exact-only.
    #[serde(default)]
    pub exact_match_for_destructive: bool,
    /// Maximum concurrent in-flight operations.
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
    /// Default limiter wait in milliseconds; zero fails fast.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Record every operation attempt in the audit trail.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_operations: default_allowed_operations(),
            exact_only_operations: Vec::new(),
            exact_match_for_destructive: false,
            max_concurrent_operations: default_max_concurrent_operations(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            audit_enabled: true,
        }
    }
}

impl SecurityConfig {
    /// Validates the security section by compiling its policy.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_operations.len() > MAX_POLICY_ENTRIES || self.exact_only_operations.len() > MAX_POLICY_ENTRIES
        {
            return Err(ConfigError::Invalid("security policy has too many entries".to_string()));
        }
        check_range("security.max_concurrent_operations", self.max_concurrent_operations, MAX_CONCURRENT_RANGE)?;
        check_range("security.acquire_timeout_ms", self.acquire_timeout_ms, (0, MAX_ACQUIRE_TIMEOUT_MS))?;
        for entry in self.allowed_operations.iter().chain(&self.exact_only_operations) {
            if !entry.ends_with(".*") && catalog::lookup(entry).is_none() {
                return Err(ConfigError::Invalid(format!("security policy names unknown operation `{entry}`")));
            }
        }
        let snapshot = PolicySnapshot::compile(self.permission_policy(), 0)
            .map_err(|err| ConfigError::Invalid(format!("security: {err}")))?;
        let missing: Vec<&str> =
            REQUIRED_OPERATIONS.iter().copied().filter(|operation| !snapshot.is_allowed(operation)).collect();
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "security.allowed_operations must allow {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Returns the permission policy.
    fn permission_policy(&self) -> PermissionPolicy {
        let mut exact_only: BTreeSet<String> = self.exact_only_operations.iter().cloned().collect();
        if self.exact_match_for_destructive {
            exact_only.extend(catalog::names_in_class(OperationClass::Destructive).map(ToString::to_string));
        }
        PermissionPolicy {
            allowed_operations: self.allowed_operations.clone(),
            exact_only_operations: exact_only.into_iter().collect(),
            audit_enabled: self.audit_enabled,
            max_concurrent_operations: self.max_concurrent_operations,
        }
    }
}

// ============================================================================
// SECTION: Audit Config
// ============================================================================

/// Audit sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// JSON-lines audit file; stderr when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging Config
// ============================================================================

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Trace-level diagnostics.
    Trace,
    /// Debug diagnostics.
    Debug,
    /// Informational messages.
    #[default]
    Info,
    /// Warnings.
    #[serde(alias = "warning")]
    Warn,
    /// Errors only.
    #[serde(alias = "critical")]
    Error,
}

impl LogLevel {
    /// Returns the filter directive for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses a level name, accepting `warning` and `critical` as aliases.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Log line formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON lines.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level.
    #[serde(default)]
    pub level: LogLevel,
    /// Line format.
    #[serde(default)]
    pub format: LogFormat,
    /// Log file; stderr when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl LoggingConfig {
    /// Validates logging configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(file) = &self.file {
            validate_path_string("logging.file", file)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
///
/// Returns the path and whether it was named explicitly.
fn resolve_path<F>(path: Option<&Path>, lookup: &F) -> Result<(PathBuf, bool), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Some(env_path) = lookup(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Checks that `value` lies within the inclusive `(min, max)` range.
fn check_range<T>(field: &str, value: T, (min, max): (T, T)) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between {min} and {max}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default backend URI.
fn default_backend_uri() -> String {
    DEFAULT_BACKEND_URI.to_string()
}

/// Default connect timeout in seconds.
const fn default_connect_timeout_secs() -> u64 {
    30
}

/// Default call timeout in seconds.
const fn default_call_timeout_secs() -> u64 {
    60
}

/// Default `virsh` executable.
fn default_virsh_path() -> String {
    "virsh".to_string()
}

/// Default connect attempts.
const fn default_max_attempts() -> u32 {
    3
}

/// Default initial backoff in milliseconds.
const fn default_initial_backoff_ms() -> u64 {
    200
}

/// Default backoff cap in milliseconds.
const fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Default advertised server name.
fn default_server_name() -> String {
    "libvirt-manager".to_string()
}

/// Default maximum request body size.
pub(crate) const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default allow-list.
fn default_allowed_operations() -> Vec<String> {
    DEFAULT_ALLOWED_OPERATIONS.iter().map(ToString::to_string).collect()
}

/// Default concurrency bound.
const fn default_max_concurrent_operations() -> usize {
    DEFAULT_MAX_CONCURRENT_OPERATIONS
}

/// Default limiter wait in milliseconds.
const fn default_acquire_timeout_ms() -> u64 {
    30_000
}

/// Serde helper for `true` defaults.
const fn default_true() -> bool {
    true
}
