use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "docsync")]
#[command(version, about = "HTTP fallback sync for realtime collaborative documents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Realtime transport base URL. Overrides LIVE_URL and docsync.toml.
    #[arg(long, global = true)]
    pub live_url: Option<String>,

    /// Document store base URL. Overrides API_BASE_URL and docsync.toml.
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the realtime transport once
    Health,
    /// Derive binary state from an HTML file and print it as base64
    Encode {
        /// HTML file, or "-" for stdin
        #[arg(long)]
        html: PathBuf,
    },
    /// Render binary state as HTML
    Render {
        /// Base64 binary state, or @path to a file containing it
        input: String,
        /// Print the structured JSON rendering instead
        #[arg(long)]
        json: bool,
    },
    /// Merge two binary updates and print the result as base64
    Merge {
        /// Remote snapshot (base64 or @path)
        remote: String,
        /// Local delta (base64 or @path)
        local: String,
    },
    /// Edit a document from stdin with fallback sync running
    Edit(EditArgs),
    /// Run the development document store
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value_t = docsync::server::DEFAULT_PORT)]
        port: u16,

        /// Enable dev mode (CORS permissive, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone)]
#[command(group(ArgGroup::new("document").required(true).args(["page", "issue"])))]
pub struct EditArgs {
    /// Workspace slug
    #[arg(long)]
    pub workspace: String,

    /// Project id
    #[arg(long)]
    pub project: String,

    /// Page id
    #[arg(long)]
    pub page: Option<String>,

    /// Issue id (edits the issue description)
    #[arg(long)]
    pub issue: Option<String>,

    /// Print the final session status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default docsync.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let env_file = docsync::config::load_env_file(&project_dir);
    let config = docsync::config::SyncConfig::with_cli_args(
        project_dir,
        cli.verbose,
        cli.live_url.clone(),
        cli.api_base_url.clone(),
    )?;

    let _logging = docsync::logging::init_logging(
        cli.verbose,
        config.toml.logging.json,
        config.log_dir().as_deref(),
    )?;
    match env_file {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %format!("{:#}", e), "ignoring environment file"),
    }

    match &cli.command {
        Commands::Health => cmd::cmd_health(&config).await?,
        Commands::Encode { html } => cmd::cmd_encode(html)?,
        Commands::Render { input, json } => cmd::cmd_render(input, *json)?,
        Commands::Merge { remote, local } => cmd::cmd_merge(remote, local)?,
        Commands::Edit(args) => cmd::cmd_edit(&config, args).await?,
        Commands::Serve { port, dev } => cmd::cmd_serve(*port, *dev).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
