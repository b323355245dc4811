//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use jarvis_core::config::Config;
use jarvis_core::core::interrupt;

use crate::logging;

mod commands;

#[derive(Parser)]
#[command(name = "jarvis")]
#[command(version)]
#[command(about = "Jarvis: a personal AI assistant that can use tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Root directory for file operations (default: current directory)
    #[arg(long, default_value = ".", global = true)]
    root: String,

    /// Override the model from config
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Write debug logs to stderr instead of the log file
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Runs one prompt and streams the reply
    #[command(visible_alias = "ask")]
    Exec {
        /// The prompt to send to the assistant
        #[arg(short, long)]
        prompt: String,
    },

    /// Interactive chat (the default)
    Chat,

    /// Lists available tools
    Tools {
        #[command(subcommand)]
        command: Option<ToolsCommands>,
    },

    /// Lists discovered skills
    Skills,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ToolsCommands {
    /// Shows one tool's description and parameters
    Info {
        /// Tool name, e.g. shell_exec
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(cli.verbose).context("initialize logging")?;
    interrupt::init()?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        root,
        model,
        verbose: _,
    } = cli;
    let root = PathBuf::from(root);

    let load_config = || -> Result<Config> {
        let mut config = Config::load().context("load config")?;
        if let Some(model) = model.as_deref() {
            config.model = model.to_string();
        }
        Ok(config)
    };

    match command.unwrap_or(Commands::Chat) {
        Commands::Exec { prompt } => commands::exec::run(&root, &prompt, &load_config()?).await,
        Commands::Chat => commands::chat::run(&root, &load_config()?).await,
        Commands::Tools { command } => match command {
            None => {
                commands::tools::list();
                Ok(())
            }
            Some(ToolsCommands::Info { name }) => commands::tools::info(&name),
        },
        Commands::Skills => {
            commands::skills::list();
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
