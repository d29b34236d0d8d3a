use crate::cmd::Context;
use crate::output::{print_json, print_table};
use clap::Args;
use rdo_release_core::{
    config::RunConfig, deliverable::HttpDeliverableSource, gerrit::GerritClient,
    reconciler::list_new_releases,
};

#[derive(Args, Debug)]
pub struct NewReleasesArgs {
    /// OpenStack release to look at (e.g. train)
    #[arg(long, short = 'r')]
    pub release: String,

    /// Look at reviews merged in the last N days
    #[arg(long, short = 'd', default_value_t = 1)]
    pub days: u32,

    /// Only look at this review
    #[arg(long, short = 'n')]
    pub review_number: Option<u64>,
}

pub fn run(ctx: &Context, args: NewReleasesArgs, json: bool) -> anyhow::Result<()> {
    let mut config = RunConfig::new(&args.release, String::new());
    config.days = args.days;
    config.review_number = args.review_number;
    if ctx.config.skip_eol {
        config.version_filter = ctx.config.version_filter()?;
    }

    let rdoinfo = ctx.load_rdoinfo(None)?;
    let gerrit = GerritClient::new(&ctx.config.gerrit_url)?;
    let deliverables = HttpDeliverableSource::new(&ctx.config.releases_url)?;
    let listed = list_new_releases(
        &config,
        &gerrit,
        &deliverables,
        &rdoinfo,
        chrono::Local::now().date_naive(),
    )?;

    if json {
        return print_json(&listed);
    }
    if listed.is_empty() {
        println!("No new releases for {}.", args.release);
        return Ok(());
    }
    let rows = listed
        .into_iter()
        .map(|l| vec![l.review_number.to_string(), l.submitted, l.version, l.package])
        .collect();
    print_table(&["REVIEW", "SUBMITTED", "VERSION", "PACKAGE"], rows);
    Ok(())
}
