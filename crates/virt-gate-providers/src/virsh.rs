// crates/virt-gate-providers/src/virsh.rs
// ============================================================================
// Module: Virsh Backend
// Description: Backend binding that drives the hypervisor through `virsh`.
// Purpose: Execute catalog operations as bounded `virsh` subprocesses.
// Dependencies: tokio, tempfile, tracing, virt-gate-core
// ============================================================================

//! ## Overview
//! [`VirshConnector`] opens a session by running `virsh version` against the
//! configured URI. Each call then runs one `virsh` process with the session's
//! URI and read-only flag, bounded by the call timeout and killed if the call
//! is dropped. Arguments are passed as an argument vector, never through a
//! shell, and resource names always travel as option values.
//!
//! XML payloads are written to a private temporary file that is removed when
//! the call finishes.
//!
//! Security posture: operation parameters are validated by the gateway
//! before they reach this module.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;
use virt_gate_core::BackendConnector;
use virt_gate_core::BackendError;
use virt_gate_core::BackendSession;
use virt_gate_core::ConnectTarget;
use virt_gate_core::OperationParams;
use virt_gate_core::OperationSpec;

use crate::model::ActionResult;
use crate::model::DomainInfo;
use crate::model::DomainState;
use crate::model::DomainStats;
use crate::model::filter_by_state;
use crate::model::to_output;
use crate::params;
use crate::parse::classify_failure;
use crate::parse::element_text;
use crate::parse::parse_defined_name;
use crate::parse::parse_domain_info;
use crate::parse::parse_domstats;
use crate::parse::parse_host_info;
use crate::parse::parse_name_list;
use crate::parse::parse_network_info;
use crate::parse::parse_pool_info;

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Opens `virsh`-backed sessions.
#[derive(Debug, Clone)]
pub struct VirshConnector {
    /// Path or name of the `virsh` executable.
    program: PathBuf,
}

impl VirshConnector {
    /// Creates a connector for the given `virsh` executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for VirshConnector {
    fn default() -> Self {
        Self::new("virsh")
    }
}

#[async_trait]
impl BackendConnector for VirshConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn BackendSession>, BackendError> {
        let session = VirshSession {
            program: self.program.clone(),
            uri: target.uri.clone(),
            readonly: target.readonly,
            call_timeout: target.call_timeout,
        };
        let version = session.run(&["version"]).await?;
        debug!(uri = %target.uri, readonly = target.readonly, version = %version.trim(), "virsh session opened");
        Ok(Arc::new(session))
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session that runs one `virsh` process per call.
#[derive(Debug)]
struct VirshSession {
    /// Path or name of the `virsh` executable.
    program: PathBuf,
    /// Hypervisor URI passed with `--connect`.
    uri: String,
    /// Pass `--readonly` on every invocation.
    readonly: bool,
    /// Bound on each subprocess.
    call_timeout: Duration,
}

#[async_trait]
impl BackendSession for VirshSession {
    async fn call(&self, operation: &OperationSpec, params: &OperationParams) -> Result<Value, BackendError> {
        match operation.name {
            "domain.list" => self.list_domains(params).await,
            "domain.info" => to_output(&self.domain_info(params::string(params, "name")?).await?),
            "domain.start" => self.start_domain(params).await,
            "domain.stop" => self.stop_domain(params).await,
            "domain.reboot" => self.reboot_domain(params).await,
            "domain.stats" => self.domain_stats(params).await,
            "domain.getxml" => {
                let name = params::string(params, "name")?;
                let xml = self.run(&["dumpxml", "--domain", name]).await?;
                Ok(json!({ "name": name, "xml": xml }))
            }
            "domain.create" => self.create_domain(params).await,
            "domain.delete" => self.delete_domain(params).await,
            "domain.attach_device" => self.change_device(params, "attach-device", "device_attached").await,
            "domain.detach_device" => self.change_device(params, "detach-device", "device_detached").await,
            "host.info" => self.host_info().await,
            "network.list" => self.list_networks().await,
            "storage.list" => self.list_pools().await,
            other => Err(BackendError::operation(format!("unsupported operation `{other}`"))),
        }
    }

    async fn close(&self) {
        debug!(uri = %self.uri, "virsh session closed");
    }
}

impl VirshSession {
    /// Runs `virsh` with string arguments.
    async fn run(&self, args: &[&str]) -> Result<String, BackendError> {
        self.run_os(args.iter().map(OsString::from).collect()).await
    }

    /// Runs `virsh` and returns stdout, classifying failures from stderr.
    async fn run_os(&self, args: Vec<OsString>) -> Result<String, BackendError> {
        let label = args.first().map(|arg| arg.to_string_lossy().into_owned()).unwrap_or_default();
        let mut command = Command::new(&self.program);
        command.arg("--connect").arg(&self.uri);
        if self.readonly {
            command.arg("--readonly");
        }
        command
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = timeout(self.call_timeout, command.output())
            .await
            .map_err(|_| BackendError::connection(format!("virsh {label} timed out")))?
            .map_err(|err| self.spawn_error(&err))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    /// Maps a spawn failure to a connection-class error.
    fn spawn_error(&self, err: &io::Error) -> BackendError {
        if err.kind() == io::ErrorKind::NotFound {
            BackendError::connection(format!("virsh executable not found: {}", self.program.display()))
        } else {
            BackendError::connection(format!("failed to run virsh: {err}"))
        }
    }

    /// Runs `virsh` with an XML document supplied through a temporary file.
    async fn run_with_xml(&self, args: &[&str], xml: &str, trailing: &[&str]) -> Result<String, BackendError> {
        let file = write_xml(xml)?;
        let mut argv: Vec<OsString> = args.iter().map(OsString::from).collect();
        argv.push(OsString::from("--file"));
        argv.push(file.path().as_os_str().to_os_string());
        argv.extend(trailing.iter().map(OsString::from));
        let result = self.run_os(argv).await;
        drop(file);
        result
    }

    /// Reads one domain's summary.
    async fn domain_info(&self, name: &str) -> Result<DomainInfo, BackendError> {
        parse_domain_info(&self.run(&["dominfo", "--domain", name]).await?)
    }

    /// Lists domains, skipping entries that vanish between list and lookup.
    async fn list_domains(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let include_inactive = params::flag_or(params, "include_inactive", true);
        let state = params::string(params, "state").unwrap_or("all");
        let listing = if include_inactive {
            self.run(&["list", "--all", "--name"]).await?
        } else {
            self.run(&["list", "--name"]).await?
        };
        let mut domains = Vec::new();
        for name in parse_name_list(&listing) {
            match self.domain_info(&name).await {
                Ok(info) => domains.push(info),
                Err(err) if err.is_connection_error() => return Err(err),
                Err(err) => warn!(domain = %name, error = %err, "skipping domain during list"),
            }
        }
        to_output(&filter_by_state(domains, state))
    }

    /// Starts a domain unless it is already running.
    async fn start_domain(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "name")?;
        let info = self.domain_info(name).await?;
        if info.state == DomainState::Running {
            return to_output(&ActionResult::new(name, "already_running", format!("domain {name} is already running")));
        }
        if params::flag(params, "force") {
            self.run(&["start", "--domain", name, "--force-boot"]).await?;
        } else {
            self.run(&["start", "--domain", name]).await?;
        }
        to_output(&ActionResult::new(name, "started", format!("domain {name} started")))
    }

    /// Stops a domain gracefully, or powers it off when forced.
    async fn stop_domain(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "name")?;
        let info = self.domain_info(name).await?;
        if info.state == DomainState::Shutoff {
            return to_output(&ActionResult::new(name, "already_stopped", format!("domain {name} is already stopped")));
        }
        let result = if params::flag(params, "force") {
            self.run(&["destroy", "--domain", name]).await?;
            ActionResult::new(name, "destroyed", format!("domain {name} powered off"))
        } else {
            self.run(&["shutdown", "--domain", name]).await?;
            ActionResult::new(name, "shutdown_requested", format!("domain {name} is shutting down"))
        };
        to_output(&result)
    }

    /// Reboots a domain; force uses the ACPI power button.
    async fn reboot_domain(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "name")?;
        if params::flag(params, "force") {
            self.run(&["reboot", "--domain", name, "--mode", "acpi"]).await?;
        } else {
            self.run(&["reboot", "--domain", name]).await?;
        }
        to_output(&ActionResult::new(name, "reboot_requested", format!("domain {name} is rebooting")))
    }

    /// Collects the requested statistic groups.
    async fn domain_stats(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "name")?;
        let info = self.domain_info(name).await?;
        let flags = params::strings(params, "flags");
        let mut argv = vec!["domstats".to_string()];
        argv.extend(flags.iter().map(|flag| format!("--{flag}")));
        argv.push("--".to_string());
        argv.push(name.to_string());
        let output = self.run_os(argv.into_iter().map(OsString::from).collect()).await?;
        to_output(&DomainStats {
            name: name.to_string(),
            state: info.state,
            flags,
            stats: parse_domstats(&output),
        })
    }

    /// Defines a persistent domain or creates a transient one.
    async fn create_domain(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let xml = params::string(params, "xml")?;
        let ephemeral = params::flag(params, "ephemeral");
        let command = if ephemeral { "create" } else { "define" };
        let output = self.run_with_xml(&[command], xml, &[]).await?;
        let name = parse_defined_name(&output).or_else(|| element_text(xml, "name")).unwrap_or_default();
        let result = if ephemeral {
            ActionResult::new(name.clone(), "created", format!("transient domain {name} created"))
        } else {
            ActionResult::new(name.clone(), "defined", format!("domain {name} defined"))
        };
        to_output(&result)
    }

    /// Deletes a domain; running domains require `force`.
    async fn delete_domain(&self, params: &OperationParams) -> Result<Value, BackendError> {
        let name = params::string(params, "name")?;
        let info = self.domain_info(name).await?;
        if info.state == DomainState::Running {
            if !params::flag(params, "force") {
                return Err(BackendError::operation(format!(
                    "domain {name} is running; set force to stop it before deleting"
                )));
            }
            self.run(&["destroy", "--domain", name]).await?;
            if !info.persistent {
                return to_output(&ActionResult::new(name, "deleted", format!("transient domain {name} destroyed")));
            }
        }
        if params::flag(params, "remove_storage") {
            self.run(&["undefine", "--domain", name, "--managed-save", "--remove-all-storage"]).await?;
        } else {
            self.run(&["undefine", "--domain", name, "--managed-save"]).await?;
        }
        to_output(&ActionResult::new(name, "deleted", format!("domain {name} deleted")))
    }

    /// Attaches or detaches a device described by XML.
    async fn change_device(
        &self,
        params: &OperationParams,
        command: &str,
        action: &'static str,
    ) -> Result<Value, BackendError> {
        let name = params::string(params, "domain_name")?;
        let device_xml = params::string(params, "device_xml")?;
        let live = params::flag_or(params, "live", true);
        let persistent = params::flag_or(params, "persistent", true);
        let mut scope = Vec::new();
        if live {
            scope.push("--live");
        }
        if persistent {
            scope.push("--config");
        }
        if scope.is_empty() {
            scope.push("--current");
        }
        self.run_with_xml(&[command, "--domain", name], device_xml, &scope).await?;
        to_output(&ActionResult::new(name, action, format!("{command} applied to domain {name}")))
    }

    /// Reads host capacity.
    async fn host_info(&self) -> Result<Value, BackendError> {
        let nodeinfo = self.run(&["nodeinfo"]).await?;
        let hostname = self.run(&["hostname"]).await?;
        to_output(&parse_host_info(&nodeinfo, &hostname, &self.uri)?)
    }

    /// Lists active and inactive networks.
    async fn list_networks(&self) -> Result<Value, BackendError> {
        let listing = self.run(&["net-list", "--all", "--name"]).await?;
        let mut networks = Vec::new();
        for name in parse_name_list(&listing) {
            match self.run(&["net-info", "--network", &name]).await {
                Ok(text) => networks.push(parse_network_info(&text)?),
                Err(err) if err.is_connection_error() => return Err(err),
                Err(err) => warn!(network = %name, error = %err, "skipping network during list"),
            }
        }
        to_output(&networks)
    }

    /// Lists active and inactive storage pools.
    async fn list_pools(&self) -> Result<Value, BackendError> {
        let listing = self.run(&["pool-list", "--all", "--name"]).await?;
        let mut pools = Vec::new();
        for name in parse_name_list(&listing) {
            match self.run(&["pool-info", "--bytes", "--pool", &name]).await {
                Ok(text) => pools.push(parse_pool_info(&text)?),
                Err(err) if err.is_connection_error() => return Err(err),
                Err(err) => warn!(pool = %name, error = %err, "skipping storage pool during list"),
            }
        }
        to_output(&pools)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Writes an XML document to a private temporary file.
fn write_xml(xml: &str) -> Result<NamedTempFile, BackendError> {
    let mut file = tempfile::Builder::new()
        .prefix("virt-gate-")
        .suffix(".xml")
        .tempfile()
        .map_err(|err| BackendError::operation(format!("failed to stage xml: {err}")))?;
    file.write_all(xml.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| BackendError::operation(format!("failed to stage xml: {err}")))?;
    Ok(file)
}
