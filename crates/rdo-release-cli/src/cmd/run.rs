use crate::cmd::{check_config, Context, ProcessArgs};
use crate::output::{format_timestamp, print_json, print_table};
use anyhow::Context as _;
use clap::Args;
use rdo_release_core::{
    deliverable::HttpDeliverableSource,
    distgit::RdopkgTool,
    gerrit::GerritClient,
    lock::RunLock,
    paths,
    poller::ThreadSleep,
    reconciler::{BatchReport, Collaborators, Reconciler},
};
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub process: ProcessArgs,

    /// Look at reviews merged in the last N days
    #[arg(long, short = 'd', default_value_t = 1)]
    pub days: u32,

    /// Only look at this review
    #[arg(long, short = 'n')]
    pub review_number: Option<u64>,
}

pub fn run(ctx: &Context, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let mut config = args.process.run_config(&ctx.config)?;
    config.days = args.days;
    config.review_number = args.review_number;
    check_config(&config.validate())?;

    let _lock = RunLock::acquire(&paths::lock_path(&ctx.base), Some(config.release.as_str()))
        .context("failed to acquire run lock")?;
    let store = ctx.open_store()?;
    let rdoinfo = ctx.load_rdoinfo(None)?;
    let gerrit = GerritClient::new(&ctx.config.gerrit_url)?;
    let deliverables = HttpDeliverableSource::new(&ctx.config.releases_url)?;
    let tool = RdopkgTool::new(
        paths::distgits_dir(&ctx.base),
        &config.user,
        config.changelog.clone(),
    )?;

    info!(
        "starting run for {} ({})",
        config.release,
        match config.review_number {
            Some(n) => format!("review {n}"),
            None => format!("last {} days", config.days),
        }
    );
    let reconciler = Reconciler::new(
        &config,
        &store,
        Collaborators {
            reviews: &gerrit,
            deliverables: &deliverables,
            index: &rdoinfo,
            pins: &rdoinfo,
            tool: &tool,
            sleeper: &ThreadSleep,
        },
    );
    let report = reconciler.run(chrono::Local::now().date_naive())?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Reviews: {} seen, {} new, {} already known, {} failed; {} packages queued",
            report.ingest.reviews_seen,
            report.ingest.reviews_recorded,
            report.ingest.reviews_known,
            report.ingest.reviews_failed,
            report.ingest.packages_added
        );
        print_batch(&report.batch);
    }
    finish(&report.batch)
}

/// Table of per-package outcomes.
pub fn print_batch(batch: &BatchReport) {
    if batch.results.is_empty() {
        println!("No packages to process.");
        return;
    }
    let rows = batch
        .results
        .iter()
        .map(|r| {
            vec![
                r.package.name.clone(),
                r.package.version.clone(),
                r.package.status.to_string(),
                format_timestamp(r.package.release_date),
                r.outcome.to_string(),
            ]
        })
        .collect();
    print_table(&["PACKAGE", "VERSION", "STATUS", "RELEASED", "OUTCOME"], rows);
}

/// Fail the command when the batch was cut short.
pub fn finish(batch: &BatchReport) -> anyhow::Result<()> {
    if batch.stopped {
        anyhow::bail!("stopped after a failed package");
    }
    Ok(())
}
