// crates/virt-gate-cli/src/main.rs
// ============================================================================
// Module: Virt Gate CLI Entry Point
// Description: Command dispatcher for the Virt Gate MCP server.
// Purpose: Start the server, check the backend, and inspect configuration and tools.
// Dependencies: clap, tokio, tracing-subscriber, virt-gate-config, virt-gate-mcp
// ============================================================================

//! ## Overview
//! The `virt-gate` binary loads configuration, installs logging, and serves
//! the libvirt MCP tools through the operation gateway. Auxiliary commands
//! check backend connectivity through the gateway, validate and print the
//! effective configuration, and list the tool bindings.
//! Security posture: configuration is untrusted input and is validated before
//! any backend connection is attempted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub(crate) mod logging;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use virt_gate_config::ServerTransport;
use virt_gate_config::VirtGateConfig;
use virt_gate_core::OperationGateway;
use virt_gate_core::OperationRequest;
use virt_gate_core::catalog::lookup;
use virt_gate_mcp::GATEWAY_STATUS_TOOL;
use virt_gate_mcp::McpServer;
use virt_gate_mcp::TOOL_BINDINGS;
use virt_gate_mcp::build_gateway;

use crate::logging::init_logging;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "virt-gate", version, about = "Permission-gated libvirt MCP server")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP server.
    Serve(ConfigArgs),
    /// Connect to the backend and list domains through the gateway.
    Check(CheckArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Tool binding utilities.
    Tools {
        /// Selected tools subcommand.
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

/// Config file selection shared by commands.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Optional config file path (defaults to virt-gate.toml or `VIRT_GATE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `check`.
#[derive(Args, Debug)]
struct CheckArgs {
    /// Config file selection.
    #[command(flatten)]
    config: ConfigArgs,
    /// Backend URI overriding the configured one.
    #[arg(long, value_name = "URI")]
    uri: Option<String>,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a config file.
    Validate(ConfigArgs),
    /// Print the effective config, including environment overrides, as TOML.
    Show(ConfigArgs),
}

/// Tools subcommands.
#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// List MCP tools with their operations and classes.
    List(ToolsListCommand),
}

/// Arguments for `tools list`.
#[derive(Args, Debug)]
struct ToolsListCommand {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Output formats for structured CLI commands.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// JSON output.
    Json,
    /// Human-readable text output.
    Text,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Serve(args) => command_serve(args).await,
        Commands::Check(args) => command_check(args).await,
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Tools {
            command,
        } => command_tools(&command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(args: ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(&args)?;
    init_logging(&config.logging).map_err(|err| CliError::new(err.to_string()))?;
    warn_network_exposure(&config);

    let server = tokio::task::spawn_blocking(move || McpServer::from_config(config))
        .await
        .map_err(|err| CliError::new(format!("server init failed: init join failed: {err}")))?
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    server.serve().await.map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Logs a warning when the server listens beyond loopback.
fn warn_network_exposure(config: &VirtGateConfig) {
    if config.server.transport == ServerTransport::Stdio {
        return;
    }
    if let Ok(addr) = config.server.bind_addr()
        && !addr.ip().is_loopback()
    {
        warn!(bind = %addr, "mcp server is reachable beyond loopback; the transport has no authentication");
    }
}

// ============================================================================
// SECTION: Check Command
// ============================================================================

/// Caller recorded in the audit trail for connectivity checks.
const CHECK_CALLER: &str = "cli:check";

/// Executes the `check` command.
async fn command_check(args: CheckArgs) -> CliResult<ExitCode> {
    let mut config = load_config(&args.config)?;
    if let Some(uri) = args.uri {
        config.backend.uri = uri;
        config.validate().map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    }
    init_logging(&config.logging).map_err(|err| CliError::new(err.to_string()))?;

    let uri = config.backend.uri.trim().to_string();
    let gateway = build_gateway(&config).map_err(|err| CliError::new(format!("gateway init failed: {err}")))?;
    let outcome = check_backend(&gateway).await;
    gateway.shutdown().await;
    let count = outcome.map_err(|err| CliError::new(format!("check failed for {uri}: {err}")))?;
    write_stdout_line(&format!("connected to {uri}: {count} domains"))?;
    Ok(ExitCode::SUCCESS)
}

/// Connects and counts domains through the gated `domain.list` operation.
async fn check_backend(gateway: &OperationGateway) -> Result<usize, String> {
    gateway.connect().await.map_err(|err| err.to_string())?;
    let result = gateway
        .execute(OperationRequest::new("domain.list", CHECK_CALLER))
        .await
        .map_err(|err| err.to_string())?;
    result.output.as_array().map(Vec::len).ok_or_else(|| "domain listing is not an array".to_string())
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(args) => command_config_validate(&args),
        ConfigCommand::Show(args) => command_config_show(&args),
    }
}

/// Executes the config validation command.
fn command_config_validate(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    let source = config
        .source_path
        .as_ref()
        .map_or_else(|| "built-in defaults".to_string(), |path| path.display().to_string());
    write_stdout_line(&format!("config ok ({source})"))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the config show command.
fn command_config_show(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    let rendered = config.to_toml().map_err(|err| CliError::new(format!("config render failed: {err}")))?;
    write_stdout(rendered.as_bytes())?;
    Ok(ExitCode::SUCCESS)
}

/// Loads and validates configuration.
fn load_config(args: &ConfigArgs) -> CliResult<VirtGateConfig> {
    VirtGateConfig::load(args.config.as_deref()).map_err(|err| CliError::new(format!("config load failed: {err}")))
}

// ============================================================================
// SECTION: Tools Commands
// ============================================================================

/// One row of the tool listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ToolRow {
    /// MCP tool name.
    tool: &'static str,
    /// Gated operation, absent for local tools.
    operation: Option<&'static str>,
    /// Operation class, or `local` for tools that never reach the backend.
    class: &'static str,
}

/// Dispatches tools subcommands.
fn command_tools(command: &ToolsCommand) -> CliResult<ExitCode> {
    match command {
        ToolsCommand::List(command) => command_tools_list(command),
    }
}

/// Executes the `tools list` command.
fn command_tools_list(command: &ToolsListCommand) -> CliResult<ExitCode> {
    let rows = tool_rows();
    let rendered = render_tool_rows(&rows, command.format)?;
    write_stdout(rendered.as_bytes())?;
    Ok(ExitCode::SUCCESS)
}

/// Builds the tool listing in advertised order.
fn tool_rows() -> Vec<ToolRow> {
    let mut rows: Vec<ToolRow> = TOOL_BINDINGS
        .iter()
        .filter_map(|binding| {
            lookup(binding.operation).map(|spec| ToolRow {
                tool: binding.tool,
                operation: Some(spec.name),
                class: spec.class.as_str(),
            })
        })
        .collect();
    rows.push(ToolRow {
        tool: GATEWAY_STATUS_TOOL,
        operation: None,
        class: "local",
    });
    rows
}

/// Renders tool rows as aligned text or JSON.
fn render_tool_rows(rows: &[ToolRow], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => {
            let mut rendered = serde_json::to_string_pretty(rows)
                .map_err(|err| CliError::new(format!("tool listing encode failed: {err}")))?;
            rendered.push('\n');
            Ok(rendered)
        }
        OutputFormat::Text => {
            let width = rows.iter().map(|row| row.tool.len()).max().unwrap_or(0);
            let op_width = rows.iter().map(|row| row.operation.unwrap_or("-").len()).max().unwrap_or(0);
            Ok(rows
                .iter()
                .map(|row| {
                    let operation = row.operation.unwrap_or("-");
                    format!("{:<width$}  {operation:<op_width$}  {}\n", row.tool, row.class)
                })
                .collect())
        }
    }
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes raw bytes to stdout.
fn write_stdout(bytes: &[u8]) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
