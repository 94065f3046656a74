//! stdio-mcp-bridge: use tools from MCP servers that run as child processes
//!
//! Starts every configured provider, discovers its tools, and then lists
//! them, calls one of them, or serves all of them to an MCP client on stdio.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use stdio_mcp_bridge::bridge::{LoadedTools, Registry, ToolProxy};
use stdio_mcp_bridge::config::{self, Config, CONFIG_PATH_ENV};
use stdio_mcp_bridge::error::{BridgeError, ConfigError};
use stdio_mcp_bridge::mcp::BridgeServer;

/// Use tools from MCP servers that run as child processes.
///
/// Reads an `mcpServers` configuration, starts each provider, and exposes the
/// tools they declare.
#[derive(Parser, Debug)]
#[command(name = "stdio-mcp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE", env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the discovered tools as JSON
    List {
        /// Group tools by provider
        #[arg(long)]
        group: bool,
    },
    /// Call one tool and print its result
    Call {
        /// Provider name as configured under `mcpServers`
        provider: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
    /// Serve all discovered tools to an MCP client on stdin/stdout (default)
    Serve,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Describes one tool for `list` output.
fn describe(tool: &ToolProxy, with_provider: bool) -> Value {
    let mut entry = json!({
        "name": tool.name(),
        "description": tool.description(),
        "inputSchema": tool.input_schema(),
    });
    if with_provider {
        entry["provider"] = json!(tool.provider());
    }
    entry
}

fn print_tools(loaded: &LoadedTools) -> Result<(), String> {
    let output = match loaded {
        LoadedTools::Flat(tools) => Value::Array(tools.iter().map(|t| describe(t, true)).collect()),
        LoadedTools::Grouped(groups) => Value::Object(
            groups
                .iter()
                .map(|(provider, tools)| {
                    let tools = tools.iter().map(|t| describe(t, false)).collect();
                    (provider.clone(), Value::Array(tools))
                })
                .collect(),
        ),
    };
    let text = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

async fn call_tool(
    registry: &Registry,
    provider: &str,
    tool: &str,
    args: &str,
) -> Result<String, String> {
    let arguments: Map<String, Value> =
        serde_json::from_str(args).map_err(|e| format!("--args must be a JSON object: {e}"))?;

    let tools = registry.grouped();
    let Some(provided) = tools.get(provider) else {
        return Err(BridgeError::UnknownProvider {
            provider: provider.to_string(),
        }
        .to_tool_text());
    };
    let Some(proxy) = provided.iter().find(|t| t.name() == tool) else {
        return Err(format!("Error: provider '{provider}' has no tool '{tool}'"));
    };

    proxy.try_invoke(arguments).await.map_err(|e| e.to_tool_text())
}

async fn run(cfg: Config, command: Command) -> Result<(), String> {
    let registry = Registry::new(cfg.settings());
    let group = matches!(command, Command::List { group: true });
    let loaded = registry.load_all(cfg.providers(), group).await;

    let outcome = match command {
        Command::List { .. } => print_tools(&loaded),
        Command::Call {
            provider,
            tool,
            args,
        } => call_tool(&registry, &provider, &tool, &args)
            .await
            .map(|text| println!("{text}")),
        Command::Serve => {
            info!("Bridge server ready, waiting for client connection...");
            let mut server = BridgeServer::new(loaded.into_flat());
            server.run().await.map_err(|e| format!("Server error: {e}"))
        }
    };

    registry.shutdown().await;
    outcome
}

/// Loads the configuration, keeping the failure so it can be reported once
/// logging is set up.
fn resolve_config(path: Option<&Path>) -> (Config, Option<ConfigError>) {
    match config::load_optional_config(path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    }
}

/// Entry point for the stdio-mcp-bridge binary.
fn main() -> ExitCode {
    let args = Args::parse();

    let (cfg, config_error) = resolve_config(args.config.as_deref());

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    if let Some(e) = config_error {
        warn!(error = %e, "Ignoring configuration, starting without providers");
        eprintln!("Configuration error: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        providers = cfg.mcp_servers.len(),
        "Starting stdio-mcp-bridge"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let command = args.command.unwrap_or(Command::Serve);
    match runtime.block_on(run(cfg, command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Bridge failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
