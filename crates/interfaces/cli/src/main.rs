mod checkpoint_cmds;
mod daemon;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use recap_config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "recap",
    version,
    about = "Incremental Slack channel digests"
)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the configured schedules until interrupted.
    Start,
    /// Perform a single digest run and print the outcome.
    Run {
        #[arg(value_enum, default_value = "scheduled")]
        mode: CliRunMode,
        /// Print the rendered digest instead of only the summary line.
        #[arg(long)]
        show: bool,
    },
    /// Inspect or reset stored cursors.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Print the effective configuration with secrets masked.
    Doctor,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum CliRunMode {
    /// Resume from the `scheduled` cursor.
    Scheduled,
    /// Resume from the later of both cursors; advances `manual`.
    Manual,
    /// Fixed lookback window; no cursor is read or written.
    Window,
}

#[derive(Debug, Subcommand)]
enum CheckpointCommands {
    /// Show every stored cursor.
    Show,
    /// Clear a cursor so its next run starts from the lookback window.
    Reset {
        #[arg(value_name = "CURSOR")]
        cursor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            config.validate()?;
            daemon::run_start_mode(config).await?;
        }
        Commands::Run { mode, show } => {
            config.validate()?;
            daemon::run_once(config, mode, show).await?;
        }
        Commands::Checkpoint { command } => match command {
            CheckpointCommands::Show => checkpoint_cmds::run_show(&config).await?,
            CheckpointCommands::Reset { cursor } => {
                checkpoint_cmds::run_reset(&config, &cursor).await?
            }
        },
        Commands::Doctor => {
            println!("recap doctor");
            println!("- config file: {}", cli.config.display());
            println!("- channel: {}", display_or_unset(&config.slack.channel_id));
            println!(
                "- slack token: {}",
                if config.slack.bot_token.is_empty() { "(unset)" } else { "set" }
            );
            println!("- provider: {}", config.llm.provider);
            println!("- model: {}", config.active_model());
            println!("- periodic schedule: {}", display_or_unset(&config.schedule.periodic));
            println!("- weekly schedule: {}", display_or_unset(&config.schedule.weekly));
            println!(
                "- checkpoints: {} ({})",
                config.checkpoint.path,
                if config.checkpoint.enabled { "enabled" } else { "disabled" }
            );
            match config.validate() {
                Ok(()) => println!("- configuration: ok"),
                Err(err) => println!("- configuration: {err}"),
            }
        }
    }

    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() { "(unset)" } else { value }
}
