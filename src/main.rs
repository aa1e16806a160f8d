mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revisit::config::Config;
use revisit::models::LinkId;

#[derive(Parser)]
#[command(
    name = "revisit",
    version,
    about = "Scheduled link visitor with proxy rotation",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Track a new link
    Add {
        /// Link page URL
        url: String,

        /// Treat the URL as a folder page and track every file on it
        #[arg(long, default_value = "false")]
        expand: bool,
    },

    /// Stop tracking a link
    Remove {
        /// Link ID
        id: LinkId,
    },

    /// Pause a link
    Pause {
        /// Link ID
        id: LinkId,
    },

    /// Resume a paused link
    Resume {
        /// Link ID
        id: LinkId,
    },

    /// List tracked links
    List {
        /// Print as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show the access times of a link's current cycle
    Schedule {
        /// Link ID
        id: LinkId,

        /// Number of slots to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Visit a link now, outside its schedule
    Visit {
        /// Link ID
        id: LinkId,
    },

    /// Show recent visits of a link
    Logs {
        /// Link ID
        id: LinkId,

        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Print the latest metrics snapshot of a running scheduler
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .as_deref()
        .unwrap_or(config.logging.format.as_str());
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run => commands::run(config).await?,
        Commands::Add { url, expand } => {
            tracing::info!(url = %url, expand = %expand, "Starting add command");
            commands::add(config, url, expand).await?;
        }
        Commands::Remove { id } => commands::remove(config, id)?,
        Commands::Pause { id } => commands::set_active(config, id, false)?,
        Commands::Resume { id } => commands::set_active(config, id, true)?,
        Commands::List { json } => commands::list(config, json)?,
        Commands::Schedule { id, limit } => commands::schedule(config, id, limit)?,
        Commands::Visit { id } => {
            tracing::info!(link_id = id, "Starting visit command");
            commands::visit(config, id).await?;
        }
        Commands::Logs { id, limit, json } => commands::logs(config, id, limit, json)?,
        Commands::Metrics => commands::print_metrics(config)?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("revisit=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("revisit={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
