// crates/virt-gate-providers/src/parse.rs
// ============================================================================
// Module: Virsh Output Parsers
// Description: Parsers for `virsh` text output and stderr classification.
// Purpose: Turn human-oriented command output into typed records.
// Dependencies: serde_json, virt-gate-core
// ============================================================================

//! ## Overview
//! `virsh` prints `Key:   value` tables for `dominfo`, `nodeinfo`,
//! `net-info` and `pool-info`, `key=value` lines for `domstats`, and one name
//! per line for `--name` listings. Parsers are lenient about spacing and
//! unknown keys but fail when an identifying field is missing.
//!
//! Failure classification reads stderr: transport loss becomes a
//! connection-class error so the connection manager can reconnect, missing
//! resources become not-found, and everything else is an operation error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use virt_gate_core::BackendError;

use crate::model::DomainInfo;
use crate::model::DomainState;
use crate::model::HostInfo;
use crate::model::NetworkInfo;
use crate::model::StoragePoolInfo;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Stderr fragments that indicate the hypervisor connection is gone.
const CONNECTION_MARKERS: &[&str] = &[
    "failed to connect to the hypervisor",
    "end of file while reading data",
    "broken pipe",
    "connection reset",
    "cannot recv data",
    "no connection driver available",
    "client socket is closed",
];

/// Stderr fragments that indicate a missing resource.
const NOT_FOUND_MARKERS: &[&str] =
    &["domain not found", "failed to get domain", "network not found", "storage pool not found"];

/// Nanoseconds per second.
const NANOS_PER_SEC: u64 = 1_000_000_000;

// ============================================================================
// SECTION: Generic Parsers
// ============================================================================

/// Parses `Key: value` lines, splitting on the first colon.
#[must_use]
pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Parses a `--name` listing into names.
#[must_use]
pub fn parse_name_list(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).map(ToString::to_string).collect()
}

/// Parses `virsh domstats` output into typed values.
///
/// Header lines (`Domain: 'name'`) are skipped; numeric values become JSON
/// numbers and everything else stays a string.
#[must_use]
pub fn parse_domstats(text: &str) -> BTreeMap<String, Value> {
    text.lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_string(), typed_value(value.trim())))
        .collect()
}

/// Extracts the domain name from a `define`/`create` confirmation line.
#[must_use]
pub fn parse_defined_name(text: &str) -> Option<String> {
    let line = text.lines().find(|line| line.trim_start().starts_with("Domain"))?;
    if let Some((_, rest)) = line.split_once('\'') {
        return rest.split_once('\'').map(|(name, _)| name.to_string());
    }
    line.split_whitespace().nth(1).map(ToString::to_string)
}

/// Returns the trimmed text of the first `<tag>` element in `xml`.
///
/// Attributes on the opening tag are allowed; nested markup is not parsed.
#[must_use]
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    let mut rest = xml;
    loop {
        let start = rest.find(&format!("<{tag}"))?;
        let after = &rest[start + tag.len() + 1..];
        let close = after.find('>')?;
        let boundary = after.chars().next();
        if matches!(boundary, Some('>' | ' ' | '\t' | '\n' | '\r')) && !after[..close].ends_with('/') {
            let body = &after[close + 1..];
            let end = body.find(&format!("</{tag}>"))?;
            let text = body[..end].trim();
            return (!text.is_empty()).then(|| text.to_string());
        }
        rest = after;
    }
}

// ============================================================================
// SECTION: Record Parsers
// ============================================================================

/// Parses `virsh dominfo` output.
///
/// # Errors
///
/// Returns an operation error when the name or UUID is missing.
pub fn parse_domain_info(text: &str) -> Result<DomainInfo, BackendError> {
    let fields = parse_key_values(text);
    Ok(DomainInfo {
        name: required(&fields, "Name", "dominfo")?,
        uuid: required(&fields, "UUID", "dominfo")?,
        id: fields.get("Id").and_then(|value| value.parse().ok()),
        state: fields.get("State").map_or(DomainState::Nostate, |value| DomainState::from_virsh(value)),
        max_memory_kib: number(&fields, "Max memory"),
        memory_kib: number(&fields, "Used memory"),
        vcpus: small_number(&fields, "CPU(s)"),
        cpu_time_ns: fields.get("CPU time").and_then(|value| parse_cpu_time(value)),
        autostart: yes(&fields, "Autostart"),
        persistent: yes(&fields, "Persistent"),
    })
}

/// Parses `virsh nodeinfo` output.
///
/// # Errors
///
/// Returns an operation error when the CPU model is missing.
pub fn parse_host_info(text: &str, hostname: &str, uri: &str) -> Result<HostInfo, BackendError> {
    let fields = parse_key_values(text);
    Ok(HostInfo {
        hostname: hostname.trim().to_string(),
        uri: uri.trim().to_string(),
        cpu_model: required(&fields, "CPU model", "nodeinfo")?,
        cpus: small_number(&fields, "CPU(s)"),
        cpu_mhz: small_number(&fields, "CPU frequency"),
        cpu_sockets: small_number(&fields, "CPU socket(s)"),
        cores_per_socket: small_number(&fields, "Core(s) per socket"),
        threads_per_core: small_number(&fields, "Thread(s) per core"),
        numa_nodes: small_number(&fields, "NUMA cell(s)"),
        memory_kib: number(&fields, "Memory size"),
    })
}

/// Parses `virsh net-info` output.
///
/// # Errors
///
/// Returns an operation error when the name or UUID is missing.
pub fn parse_network_info(text: &str) -> Result<NetworkInfo, BackendError> {
    let fields = parse_key_values(text);
    Ok(NetworkInfo {
        name: required(&fields, "Name", "net-info")?,
        uuid: required(&fields, "UUID", "net-info")?,
        active: yes(&fields, "Active"),
        bridge: fields.get("Bridge").filter(|value| !value.is_empty()).cloned(),
        autostart: yes(&fields, "Autostart"),
        persistent: yes(&fields, "Persistent"),
    })
}

/// Parses `virsh pool-info --bytes` output.
///
/// # Errors
///
/// Returns an operation error when the name or UUID is missing.
pub fn parse_pool_info(text: &str) -> Result<StoragePoolInfo, BackendError> {
    let fields = parse_key_values(text);
    Ok(StoragePoolInfo {
        name: required(&fields, "Name", "pool-info")?,
        uuid: required(&fields, "UUID", "pool-info")?,
        state: fields.get("State").cloned().unwrap_or_else(|| "inactive".to_string()),
        capacity_bytes: number(&fields, "Capacity"),
        allocation_bytes: number(&fields, "Allocation"),
        available_bytes: number(&fields, "Available"),
        autostart: yes(&fields, "Autostart"),
        persistent: yes(&fields, "Persistent"),
    })
}

// ============================================================================
// SECTION: Failure Classification
// ============================================================================

/// Classifies `virsh` stderr into a backend error.
#[must_use]
pub fn classify_failure(stderr: &str) -> BackendError {
    let message = stderr
        .lines()
        .map(|line| line.trim().trim_start_matches("error:").trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let lowered = message.to_ascii_lowercase();
    if CONNECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        BackendError::connection(message)
    } else if NOT_FOUND_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        BackendError::not_found(message)
    } else if message.is_empty() {
        BackendError::operation("virsh failed without diagnostics")
    } else {
        BackendError::operation(message)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns a required field or an operation error.
fn required(fields: &BTreeMap<String, String>, key: &str, command: &str) -> Result<String, BackendError> {
    fields
        .get(key)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| BackendError::operation(format!("{command} output is missing `{key}`")))
}

/// Returns the leading integer of a field such as `2097152 KiB`, or zero.
fn number(fields: &BTreeMap<String, String>, key: &str) -> u64 {
    fields.get(key).and_then(|value| leading_number(value)).unwrap_or(0)
}

/// Returns the leading integer of a field as `u32`, or zero.
fn small_number(fields: &BTreeMap<String, String>, key: &str) -> u32 {
    u32::try_from(number(fields, key)).unwrap_or(u32::MAX)
}

/// Returns true for `yes` or `enable` fields.
fn yes(fields: &BTreeMap<String, String>, key: &str) -> bool {
    fields.get(key).is_some_and(|value| matches!(value.as_str(), "yes" | "enable"))
}

/// Parses the digits at the start of `text`.
fn leading_number(text: &str) -> Option<u64> {
    let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Parses `41.2s` into nanoseconds without floating point.
fn parse_cpu_time(text: &str) -> Option<u64> {
    let text = text.trim().trim_end_matches('s');
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let seconds: u64 = whole.parse().ok()?;
    let mut digits: String = fraction.chars().take(9).collect();
    if !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: u64 = digits.parse().ok()?;
    seconds.checked_mul(NANOS_PER_SEC)?.checked_add(nanos)
}

/// Converts a stat value to a JSON number when it is numeric.
fn typed_value(text: &str) -> Value {
    if let Ok(value) = text.parse::<u64>() {
        return Value::from(value);
    }
    if let Ok(value) = text.parse::<i64>() {
        return Value::from(value);
    }
    Value::String(text.to_string())
}
