mod cli;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use burnwatch::core::config::EngineConfig;

#[derive(Parser)]
#[command(name = "burnwatch", about = "Token quota and burn-rate tracking", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $XDG_CONFIG_HOME/burnwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines event log through the engine and print the final snapshot
    Replay {
        /// Event log, one JSON event per line
        file: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Validate config file
    Check,
    /// Print the effective configuration
    Show,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "burnwatch=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            match cli.format.as_deref() {
                Some("json") => cli::output::OutputFormat::Json,
                _ => cli::output::OutputFormat::Text,
            }
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
        verbose: cli.verbose,
    };

    let config_path = cli.config.clone().unwrap_or_else(EngineConfig::config_path);
    let load_config = || -> anyhow::Result<EngineConfig> {
        if config_path.exists() {
            EngineConfig::load_from(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path.display()))
        } else {
            Ok(EngineConfig::default())
        }
    };

    match cli.command {
        Commands::Replay { file } => {
            let config = load_config()?;
            cli::replay_cmd::run(&file, config, &output_opts).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init => cli::config_cmd::init(&config_path, &output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&config_path, &output_opts)?,
            ConfigAction::Show => cli::config_cmd::show(&load_config()?, &output_opts)?,
        },
    }

    Ok(())
}
