//! Config load validation tests for virt-gate-config.
// crates/virt-gate-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, schema).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use virt_gate_config::BackendDriver;
use virt_gate_config::ConfigError;
use virt_gate_config::LogFormat;
use virt_gate_config::LogLevel;
use virt_gate_config::ServerTransport;
use virt_gate_config::VirtGateConfig;

type TestResult = Result<(), String>;

fn no_env(_: &str) -> Option<String> {
    None
}

fn load(path: &Path) -> Result<VirtGateConfig, ConfigError> {
    VirtGateConfig::load_with_env(Some(path), no_env)
}

fn write_config(contents: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(contents.as_bytes()).map_err(|err| err.to_string())?;
    Ok(file)
}

fn assert_invalid(result: Result<VirtGateConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(load(Path::new(&long_path)), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(load(Path::new(&long_component)), "config path component too long")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let file = write_config(&"#".repeat(1_048_577))?;
    assert_invalid(load(file.path()), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(load(file.path()), "config file must be utf-8")
}

#[test]
fn load_rejects_missing_explicit_file() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    assert_invalid(load(&dir.path().join("absent.toml")), "config io error")
}

#[test]
fn load_rejects_unknown_keys() -> TestResult {
    let file = write_config("[backend]\nurl = \"qemu:///session\"\n")?;
    assert_invalid(load(file.path()), "config parse error")
}

#[test]
fn missing_default_file_yields_defaults() -> TestResult {
    let config = VirtGateConfig::load_with_env(None, no_env).map_err(|err| err.to_string())?;
    if config != VirtGateConfig::default() {
        return Err("expected default configuration".to_string());
    }
    Ok(())
}

#[test]
fn config_path_env_var_is_explicit() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let missing = dir.path().join("missing.toml").display().to_string();
    let result = VirtGateConfig::load_with_env(None, |key| (key == "VIRT_GATE_CONFIG").then(|| missing.clone()));
    assert_invalid(result, "config io error")
}

#[test]
fn defaults_match_documented_values() -> TestResult {
    let config = VirtGateConfig::default();
    config.validate().map_err(|err| err.to_string())?;
    let checks = [
        (config.backend.driver == BackendDriver::Virsh, "driver"),
        (config.backend.uri == "qemu:///system", "uri"),
        (!config.backend.readonly, "readonly"),
        (config.backend.connect_timeout_secs == 30, "connect timeout"),
        (config.backend.call_timeout_secs == 60, "call timeout"),
        (config.backend.retry.max_attempts == 3, "max attempts"),
        (config.server.name == "libvirt-manager", "server name"),
        (config.server.transport == ServerTransport::Stdio, "transport"),
        (config.security.max_concurrent_operations == 10, "max concurrent"),
        (config.security.audit_enabled, "audit enabled"),
        (config.logging.level == LogLevel::Info, "log level"),
        (config.logging.format == LogFormat::Text, "log format"),
    ];
    for (ok, label) in checks {
        if !ok {
            return Err(format!("unexpected default for {label}"));
        }
    }
    Ok(())
}

#[test]
fn load_reads_full_file_and_records_source() -> TestResult {
    let file = write_config(
        r#"
[backend]
driver = "memory"
uri = "test:///default"
readonly = true
call_timeout_secs = 5

[backend.retry]
max_attempts = 5
initial_backoff_ms = 50
max_backoff_ms = 400

[server]
name = "lab-gate"
transport = "http"
bind = "127.0.0.1:9000"

[security]
allowed_operations = ["domain.*", "host.info"]
max_concurrent_operations = 4
acquire_timeout_ms = 0

[audit]
path = "/var/log/virt-gate/audit.jsonl"

[logging]
level = "warning"
format = "json"
"#,
    )?;
    let config = load(file.path()).map_err(|err| err.to_string())?;
    let settings = config.connection_settings();
    let checks = [
        (config.backend.driver == BackendDriver::Memory, "driver"),
        (settings.uri == "test:///default", "uri"),
        (settings.readonly, "readonly"),
        (settings.call_timeout.as_secs() == 5, "call timeout"),
        (settings.retry.max_attempts == 5, "retry attempts"),
        (settings.retry.max_backoff.as_millis() == 400, "retry cap"),
        (config.server.bind_addr().is_ok(), "bind"),
        (config.gateway_config().default_acquire_timeout.is_zero(), "acquire timeout"),
        (config.logging.level == LogLevel::Warn, "warning alias"),
        (config.logging.format == LogFormat::Json, "format"),
        (config.source_path.as_deref() == Some(file.path()), "source path"),
    ];
    for (ok, label) in checks {
        if !ok {
            return Err(format!("unexpected value for {label}"));
        }
    }
    Ok(())
}

#[test]
fn effective_config_renders_back_to_toml() -> TestResult {
    let config = VirtGateConfig::default();
    let rendered = config.to_toml().map_err(|err| err.to_string())?;
    let reparsed = VirtGateConfig::from_bytes(rendered.as_bytes()).map_err(|err| err.to_string())?;
    if reparsed != config {
        return Err("rendered config did not parse back to the same value".to_string());
    }
    Ok(())
}
