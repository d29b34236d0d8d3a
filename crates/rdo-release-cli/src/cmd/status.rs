use crate::cmd::Context;
use crate::output::{format_timestamp, print_json, print_table};
use clap::Args;
use rdo_release_core::{
    store::PackageFilter,
    types::{PackageStatus, SortOrder},
};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only this release
    #[arg(long, short = 'r')]
    pub release: Option<String>,

    /// Only packages in this status (e.g. NEW, RETRY, NOTBRANCHED)
    #[arg(long, short = 's')]
    pub status: Option<PackageStatus>,

    /// Only this package
    #[arg(long)]
    pub name: Option<String>,
}

pub fn run(ctx: &Context, args: StatusArgs, json: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let filter = PackageFilter {
        target_release: args.release,
        status: args.status,
        name: args.name,
        ..PackageFilter::default()
    };
    let packages = store.find_packages(&filter, SortOrder::Asc)?;

    if json {
        return print_json(&packages);
    }
    if packages.is_empty() {
        println!("No packages.");
        return Ok(());
    }
    let rows = packages
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.version.clone(),
                p.target_release.clone(),
                p.status.to_string(),
                p.retries.to_string(),
                p.review_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                format_timestamp(p.release_date),
                format_timestamp(p.process_date),
            ]
        })
        .collect();
    print_table(
        &[
            "PACKAGE",
            "VERSION",
            "RELEASE",
            "STATUS",
            "RETRIES",
            "REVIEW",
            "RELEASED",
            "PROCESSED",
        ],
        rows,
    );
    Ok(())
}
