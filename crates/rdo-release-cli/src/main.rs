mod cmd;
mod logging;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    new_releases::NewReleasesArgs, pins::PinsArgs, reviews::ReviewsArgs, run::RunArgs,
    status::StatusArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rdo-release",
    about = "Turn merged OpenStack release reviews into RDO package update reviews",
    version,
    propagate_version = true
)]
struct Cli {
    /// Base directory for data/ and logs/ (default: $HOME)
    #[arg(long, short = 'b', global = true, env = "RDO_RELEASE_DIR")]
    directory: Option<PathBuf>,

    /// Configuration file (default: <base>/rdo-release.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest merged release reviews and process queued packages
    Run(RunArgs),

    /// Queue and process packages whose rdoinfo pin changed in the last commit
    Pins(PinsArgs),

    /// List new releases in the review window without recording anything
    NewReleases(NewReleasesArgs),

    /// Show tracked packages
    Status(StatusArgs),

    /// Show processed release reviews
    Reviews(ReviewsArgs),
}

impl Commands {
    /// Commands that change packaging state get INFO logs and a log file.
    fn is_batch(&self) -> bool {
        matches!(self, Commands::Run(_) | Commands::Pins(_))
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let base = root::resolve_base(cli.directory.as_deref())?;
    let ctx = cmd::Context::load(base, cli.config.as_deref())?;

    if cli.command.is_batch() {
        let log_file = rdo_release_core::paths::log_file(&ctx.base, &chrono::Local::now());
        logging::init(tracing::Level::INFO, logging::Console::Stdout, Some(&log_file))?;
    } else {
        logging::init(tracing::Level::WARN, logging::Console::Stderr, None)?;
    }

    match cli.command {
        Commands::Run(args) => cmd::run::run(&ctx, args, cli.json),
        Commands::Pins(args) => cmd::pins::run(&ctx, args, cli.json),
        Commands::NewReleases(args) => cmd::new_releases::run(&ctx, args, cli.json),
        Commands::Status(args) => cmd::status::run(&ctx, args, cli.json),
        Commands::Reviews(args) => cmd::reviews::run(&ctx, args, cli.json),
    }
}
