use crate::cmd::{check_config, run::finish, run::print_batch, Context, ProcessArgs};
use crate::output::print_json;
use anyhow::Context as _;
use clap::Args;
use rdo_release_core::{
    deliverable::HttpDeliverableSource,
    distgit::RdopkgTool,
    gerrit::GerritClient,
    lock::RunLock,
    paths,
    poller::ThreadSleep,
    rdoinfo::pin_changes,
    reconciler::{Collaborators, Reconciler},
};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct PinsArgs {
    #[command(flatten)]
    pub process: ProcessArgs,

    /// Use this rdoinfo checkout as is instead of updating the managed one
    #[arg(long)]
    pub rdoinfo: Option<PathBuf>,
}

pub fn run(ctx: &Context, args: PinsArgs, json: bool) -> anyhow::Result<()> {
    let config = args.process.run_config(&ctx.config)?;
    check_config(&config.validate())?;

    let _lock = RunLock::acquire(&paths::lock_path(&ctx.base), Some(config.release.as_str()))
        .context("failed to acquire run lock")?;
    let store = ctx.open_store()?;

    let checkout = ctx.rdoinfo(args.rdoinfo.as_deref())?;
    let previous = checkout
        .load_revision("HEAD~")
        .context("failed to read the previous rdoinfo revision")?;
    let current = checkout
        .load_current()
        .context("failed to read the current rdoinfo")?;
    let changes = pin_changes(&previous, &current, &config.release);
    info!(
        "{} pin changes for {} in the last rdoinfo commit",
        changes.len(),
        config.release
    );

    let gerrit = GerritClient::new(&ctx.config.gerrit_url)?;
    let deliverables = HttpDeliverableSource::new(&ctx.config.releases_url)?;
    let tool = RdopkgTool::new(
        paths::distgits_dir(&ctx.base),
        &config.user,
        config.changelog.clone(),
    )?;
    let reconciler = Reconciler::new(
        &config,
        &store,
        Collaborators {
            reviews: &gerrit,
            deliverables: &deliverables,
            index: &current,
            pins: &current,
            tool: &tool,
            sleeper: &ThreadSleep,
        },
    );

    let added = reconciler.ingest_pins(&changes)?;
    let batch = reconciler.process_packages()?;

    if json {
        #[derive(serde::Serialize)]
        struct PinsOutput<'a> {
            pins_added: usize,
            batch: &'a rdo_release_core::reconciler::BatchReport,
        }
        print_json(&PinsOutput {
            pins_added: added,
            batch: &batch,
        })?;
    } else {
        println!("Pins: {} changed, {added} queued", changes.len());
        print_batch(&batch);
    }
    finish(&batch)
}
