//! IRC Bridge - Main binary

use clap::{Parser, Subcommand};
use ircbridge_core::{CommandManager, Config, Runtime};
use std::path::PathBuf;
use tracing::{error, info};

/// IRC Bridge - keeps bots connected and answers permission-checked commands
#[derive(Parser)]
#[command(name = "ircbridge")]
#[command(about = "An IRC bridge runtime with permission-checked command dispatch")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ircbridge.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "ircbridge.toml")]
        output: PathBuf,
    },
    /// Show the bots a configuration file would start
    Info,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Info => {
                show_info(&load_config(&cli.config)?);
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = load_config(&cli.config)?;
    config.validate()?;

    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut commands = CommandManager::from_config(&config);
    ircbridge_modules::register_builtin_commands(&mut commands)?;

    let runtime = Runtime::new(config, commands)?;
    info!("Starting IRC bridge...");
    runtime.start()?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    runtime.shutdown("Bridge shutting down").await;

    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        Ok(Config::from_file(path)?)
    } else {
        info!("Configuration file not found, using defaults");
        Ok(Config::default())
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

fn show_info(config: &Config) {
    println!("IRC Bridge {}", env!("CARGO_PKG_VERSION"));
    println!("==========");
    for identity in &config.identities {
        for server in &config.servers {
            let role = if identity.primary { "primary" } else { "secondary" };
            println!(
                "  {}@{}: {} on {}{} ({})",
                identity.name,
                server.name,
                identity.nickname,
                server,
                if server.tls { " (tls)" } else { "" },
                role
            );
        }
    }
    for channel in &config.channels {
        let echo = if channel.echo { " [echo]" } else { "" };
        println!("  channel {}{}", channel.name, echo);
    }
    println!("  command prefix: {}", config.commands.prefix);
}

/// Show version information
fn show_version() {
    println!("ircbridge {}", env!("CARGO_PKG_VERSION"));
}
