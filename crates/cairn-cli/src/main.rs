#![forbid(unsafe_code)]

mod cmd;
mod output;

use cairn_core::config::{resolve_config, resolve_db_path};
use cairn_core::error::ErrorCode;
use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "cairn: activity log, feed and notifications for crag documentation",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides CAIRN_FORMAT).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Activity store path (overrides CAIRN_DB).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create or migrate the activity store",
        after_help = "EXAMPLES:\n    # Create the store in the default data directory\n    cairn init\n\n    # Create a store elsewhere and write a default config\n    cairn --db ./cairn.sqlite3 --config ./cairn.toml init --write-config"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Upsert content entities the notifier resolves",
        after_help = "EXAMPLES:\n    # Store one route\n    cairn put '{\"type\":\"route\",\"object\":{\"id\":501,\"block_fk\":601,\"name\":\"Arete\",\"grade\":12}}'\n\n    # Store a batch from a file\n    cairn put - < content.json"
    )]
    Put(cmd::put::PutArgs),

    #[command(
        next_help_heading = "Recording",
        about = "Record a created, deleted or uploaded activity",
        after_help = "EXAMPLES:\n    # A user created a route on a block\n    cairn record --type created --user 301 --region 1 --entity route:501 --parent block:601\n\n    # A moderator granted a role\n    cairn record --type created --user 301 --region 1 --entity user:302 --column role --value editor"
    )]
    Record(cmd::record::RecordArgs),

    #[command(
        next_help_heading = "Recording",
        about = "Record an update from before/after snapshots",
        long_about = "Diff two JSON snapshots of an entity and record one activity per changed column.\n\nEdits by the same user to the same column within the compaction window amend the earlier row instead of appending.",
        after_help = "EXAMPLES:\n    # Rename a route\n    cairn update --user 301 --region 1 --entity route:501 --parent block:601 \\\n        --old '{\"name\":\"Arete\"}' --new '{\"name\":\"The Arete\"}'"
    )]
    Update(cmd::update::UpdateArgs),

    #[command(
        next_help_heading = "Reading",
        about = "Show one page of a region's feed",
        after_help = "EXAMPLES:\n    # First page of region 1\n    cairn feed --region 1\n\n    # Second page as JSON\n    cairn feed --region 1 --page 1 --json"
    )]
    Feed(cmd::feed::FeedArgs),

    #[command(
        next_help_heading = "Delivery",
        about = "Run one notification pass",
        long_about = "Claim un-notified activities, group and compose them, and write each notification as one JSON line to stdout. The pass summary goes to stderr.",
        after_help = "EXAMPLES:\n    # Run a pass now\n    cairn notify\n\n    # Run with a fixed claim name, e.g. from a scheduler\n    cairn notify --claimant cron-host-1"
    )]
    Notify(cmd::notify::NotifyArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash completions\n    cairn completions bash > ~/.local/share/bash-completion/completions/cairn"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("CAIRN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "cairn=debug,info"
        } else {
            "cairn=info,warn"
        })
    });

    let format = env::var("CAIRN_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();

    if let Commands::Completions(args) = &cli.command {
        return cmd::completions::run_completions(args.shell, &mut Cli::command());
    }

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            render_error(
                output,
                &CliError::from_code(ErrorCode::ConfigParseError, format!("{err:#}")),
            )?;
            return Err(err);
        }
    };

    let session = cmd::Session {
        db_path: resolve_db_path(cli.db.as_deref(), env::var("CAIRN_DB").ok()),
        config_path: cli.config.clone(),
        config,
        output,
    };

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &session),
        Commands::Put(args) => cmd::put::run_put(args, &session),
        Commands::Record(args) => cmd::record::run_record(args, &session),
        Commands::Update(args) => cmd::update::run_update(args, &session),
        Commands::Feed(args) => cmd::feed::run_feed(args, &session),
        Commands::Notify(args) => cmd::notify::run_notify(args, &session),
        Commands::Completions(_) => Ok(()),
    }
}
