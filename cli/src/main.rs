// Tether CLI - Command Line Interface Entry Point

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tether_config::{Config, ConfigLoader, McpServerTransportConfig, parse_override};
use tether_core::Tether;
use tether_core::mcp::McpConnectionManager;
use tether_core::model::OpenAiClient;
use tether_core::tools::ToolRegistry;
use tether_core::turn::TurnOutcome;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::terminal::{StdinLines, TerminalSink, stdin_lines};

/// Tether - run a model against local and remote tools, with approval
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
struct TopCli {
    #[clap(flatten)]
    config_overrides: CliConfigOverrides,

    #[clap(subcommand)]
    command: Option<Commands>,

    /// Initial prompt/task to execute
    #[arg(short = 'p', long = "prompt")]
    prompt: Option<String>,

    /// Working directory
    #[arg(short = 'd', long = "dir", global = true)]
    dir: Option<PathBuf>,
}

/// CLI configuration overrides
#[derive(Debug, clap::Args)]
struct CliConfigOverrides {
    /// Configuration override in key=value format
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Named profile from the `profiles` table
    #[arg(long = "profile", global = true)]
    profile: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Start interactive mode (default)
    Chat,

    /// Execute a single task
    Run {
        /// Task description
        task: String,
    },

    /// Inspect tool providers
    Mcp {
        #[command(subcommand)]
        mcp_command: McpCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

/// Tool provider commands
#[derive(Debug, Subcommand)]
enum McpCommands {
    /// List configured providers and the tools they expose
    List,
}

/// Configuration commands
#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TopCli::parse();

    if let Some(dir) = &cli.dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot enter {}", dir.display()))?;
    }
    let config = load_config(&cli.config_overrides)?;
    init_logging(&config);

    info!("Tether CLI starting...");

    match cli.command {
        Some(Commands::Chat) => run_chat(config).await,
        Some(Commands::Run { task }) => run_task(config, task).await,
        Some(Commands::Mcp { mcp_command }) => handle_mcp_command(config, mcp_command).await,
        Some(Commands::Config { config_command }) => handle_config_command(&config, config_command),
        None => match cli.prompt {
            Some(prompt) => run_task(config, prompt).await,
            None => run_chat(config).await,
        },
    }
}

fn load_config(overrides: &CliConfigOverrides) -> Result<Config> {
    let parsed = overrides
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>>>()?;
    ConfigLoader::new()
        .with_project_dir(std::env::current_dir()?)
        .with_profile(overrides.profile.clone())
        .load_with_cli_overrides(parsed)
}

/// Logs go to stderr so they never mix with the model's answer.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn start_session(config: Config, input: StdinLines) -> Result<Tether> {
    let model = Arc::new(OpenAiClient::from_config(&config.models));
    let sink = Arc::new(TerminalSink::new(input));
    Tether::new(config, model, sink).await
}

/// Ctrl-C interrupts the running turn; the session stays usable.
fn spawn_interrupt_listener(tether: &Tether) {
    let handle = tether.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.interrupt() {
                eprintln!("\n(interrupted)");
            }
        }
    });
}

/// Run a single task
async fn run_task(config: Config, task: String) -> Result<()> {
    let mut tether = start_session(config, stdin_lines()).await?;
    spawn_interrupt_listener(&tether);

    let outcome = tether.run_turn(&task).await;
    tether.shutdown().await;
    match outcome {
        TurnOutcome::Done { .. } => Ok(()),
        TurnOutcome::Terminated { reason } => bail!("turn terminated: {reason}"),
    }
}

/// Interactive loop: one user turn per line.
async fn run_chat(config: Config) -> Result<()> {
    let input = stdin_lines();
    let mut tether = start_session(config, input.clone()).await?;
    spawn_interrupt_listener(&tether);

    println!("Tether Interactive Mode");
    println!("Type 'exit' to quit");
    println!();

    loop {
        eprint!("tether> ");
        let line = tokio::select! {
            line = async { input.lock().await.next_line().await } => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        tether.run_turn(line).await;
        if tether.session().is_shut_down() {
            break;
        }
    }

    println!("Goodbye!");
    tether.shutdown().await;
    Ok(())
}

/// Handle MCP commands
async fn handle_mcp_command(config: Config, cmd: McpCommands) -> Result<()> {
    match cmd {
        McpCommands::List => {
            if config.mcp.servers.is_empty() {
                println!("No tool providers configured.");
                return Ok(());
            }
            let manager = McpConnectionManager::new(Arc::new(ToolRegistry::new()), &config.mcp);
            if let Err(err) = manager.connect_all().await {
                eprintln!("warning: {err}");
            }
            for status in manager.servers() {
                let transport = config
                    .mcp
                    .servers
                    .get(&status.id)
                    .map(|server| describe_transport(&server.transport))
                    .unwrap_or_default();
                let state = match (status.enabled, status.connected) {
                    (false, _) => "disabled",
                    (true, true) => "connected",
                    (true, false) => "unavailable",
                };
                let required = if status.required { " (required)" } else { "" };
                println!("{} [{state}]{required} {transport}", status.id);
                for tool in status.tools {
                    println!("    {tool}");
                }
            }
            manager.shutdown_all();
        }
    }
    Ok(())
}

fn describe_transport(transport: &McpServerTransportConfig) -> String {
    match transport {
        McpServerTransportConfig::Stdio { command, args, .. } => {
            let mut parts = vec![command.clone()];
            parts.extend(args.iter().cloned());
            format!("stdio: {}", parts.join(" "))
        }
        McpServerTransportConfig::Tcp { address } => format!("tcp: {address}"),
    }
}

/// Handle config commands
fn handle_config_command(config: &Config, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let rendered =
                toml::to_string_pretty(config).context("failed to render configuration")?;
            println!("{rendered}");
        }
    }
    Ok(())
}
